use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::media::MediaType;

/// Last-known outcome of syncing one title.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemStatus {
    AlreadyAvailable,
    Skipped,
    AlreadyRequested,
    Requested,
    Blocked,
    NotFound,
    Error,
    RequestFailed,
    Other(String),
}

impl ItemStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ItemStatus::AlreadyAvailable => "already_available",
            ItemStatus::Skipped => "skipped",
            ItemStatus::AlreadyRequested => "already_requested",
            ItemStatus::Requested => "requested",
            ItemStatus::Blocked => "blocked",
            ItemStatus::NotFound => "not_found",
            ItemStatus::Error => "error",
            ItemStatus::RequestFailed => "request_failed",
            ItemStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "already_available" => ItemStatus::AlreadyAvailable,
            "skipped" => ItemStatus::Skipped,
            "already_requested" => ItemStatus::AlreadyRequested,
            "requested" => ItemStatus::Requested,
            "blocked" => ItemStatus::Blocked,
            "not_found" => ItemStatus::NotFound,
            "error" => ItemStatus::Error,
            "request_failed" => ItemStatus::RequestFailed,
            other => ItemStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListRef {
    pub list_type: String,
    pub list_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncedItem {
    pub id: i64,
    pub title: String,
    pub media_type: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<String>,
    pub imdb_id: Option<String>,
    pub overseerr_id: Option<i64>,
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieDetails {
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: i64,
    pub status: ItemStatus,
}

/// Fields supplied by a sync run for one title.
#[derive(Debug, Clone)]
pub struct NewItem<'a> {
    pub title: &'a str,
    pub media_type: MediaType,
    pub year: Option<i32>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<&'a str>,
    pub overseerr_id: Option<i64>,
    pub status: ItemStatus,
}

pub struct DeclinedEntry<'a> {
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: Option<&'a str>,
    pub year: Option<i32>,
    pub declined_by_user_id: Option<i64>,
    pub reason: &'a str,
}

pub fn open(path: &std::path::Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init(&conn)?;
    Ok(conn)
}

// Initialize database and tables
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        -- Configured external lists
        CREATE TABLE IF NOT EXISTS lists (
            list_type TEXT NOT NULL,
            list_id TEXT NOT NULL,
            user_id TEXT,
            item_count INTEGER DEFAULT 0,
            last_synced TEXT,
            PRIMARY KEY (list_type, list_id)
        );

        -- One row per title, last known status
        CREATE TABLE IF NOT EXISTS synced_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            media_type TEXT NOT NULL,
            year INTEGER,
            tmdb_id TEXT,
            imdb_id TEXT,
            overseerr_id INTEGER,
            status TEXT NOT NULL,
            last_synced TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_items_tmdb
            ON synced_items (media_type, tmdb_id);

        CREATE INDEX IF NOT EXISTS idx_items_status
            ON synced_items (status);

        -- Which lists a title appears on
        CREATE TABLE IF NOT EXISTS item_lists (
            item_id INTEGER NOT NULL,
            list_type TEXT NOT NULL,
            list_id TEXT NOT NULL,
            PRIMARY KEY (item_id, list_type, list_id)
        );
        ",
    )?;

    init_declined_table(conn)?;

    Ok(())
}

pub fn init_declined_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS declined_requests (
            tmdb_id TEXT NOT NULL,
            media_type TEXT NOT NULL,
            title TEXT,
            year INTEGER,
            declined_at TEXT NOT NULL,
            declined_by_user_id TEXT,
            reason TEXT,
            PRIMARY KEY (tmdb_id, media_type)
        );
        ",
    )?;
    Ok(())
}

pub fn upsert_list(
    conn: &Connection,
    list_type: &str,
    list_id: &str,
    user_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "
        INSERT INTO lists (list_type, list_id, user_id, last_synced)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(list_type, list_id) DO UPDATE SET
            user_id = excluded.user_id,
            last_synced = excluded.last_synced
        ",
        params![list_type, list_id, user_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// Titles without a TMDB id are matched on IMDb id, then on title and year.
fn existing_item(conn: &Connection, item: &NewItem<'_>, tmdb_id: Option<&str>) -> Result<Option<i64>> {
    let media_type = item.media_type.as_str();

    let found = match (tmdb_id, item.imdb_id) {
        (Some(tmdb_id), _) => conn
            .query_row(
                "SELECT id FROM synced_items WHERE media_type = ?1 AND tmdb_id = ?2",
                params![media_type, tmdb_id],
                |row| row.get(0),
            )
            .optional()?,
        (None, Some(imdb_id)) => conn
            .query_row(
                "
                SELECT id FROM synced_items
                WHERE media_type = ?1 AND tmdb_id IS NULL AND imdb_id = ?2
                LIMIT 1
                ",
                params![media_type, imdb_id],
                |row| row.get(0),
            )
            .optional()?,
        (None, None) => conn
            .query_row(
                "
                SELECT id FROM synced_items
                WHERE media_type = ?1 AND tmdb_id IS NULL AND imdb_id IS NULL
                  AND title = ?2 AND year IS ?3
                LIMIT 1
                ",
                params![media_type, item.title, item.year],
                |row| row.get(0),
            )
            .optional()?,
    };

    Ok(found)
}

/// Insert or refresh an item and link it to a list. Returns the item id.
pub fn record_item(
    conn: &Connection,
    list_type: &str,
    list_id: &str,
    item: &NewItem<'_>,
) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let tmdb_id = item.tmdb_id.map(|id| id.to_string());

    let existing = existing_item(conn, item, tmdb_id.as_deref())?;

    let item_id = match existing {
        Some(id) => {
            conn.execute(
                "
                UPDATE synced_items
                SET title = ?1, year = ?2, imdb_id = COALESCE(?3, imdb_id),
                    overseerr_id = COALESCE(?4, overseerr_id), status = ?5, last_synced = ?6
                WHERE id = ?7
                ",
                params![
                    item.title,
                    item.year,
                    item.imdb_id,
                    item.overseerr_id,
                    item.status.as_str(),
                    now,
                    id
                ],
            )?;
            id
        }
        None => {
            conn.execute(
                "
                INSERT INTO synced_items
                (title, media_type, year, tmdb_id, imdb_id, overseerr_id, status, last_synced)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                params![
                    item.title,
                    item.media_type.as_str(),
                    item.year,
                    tmdb_id,
                    item.imdb_id,
                    item.overseerr_id,
                    item.status.as_str(),
                    now
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    conn.execute(
        "INSERT OR IGNORE INTO item_lists (item_id, list_type, list_id) VALUES (?1, ?2, ?3)",
        params![item_id, list_type, list_id],
    )?;

    conn.execute(
        "
        UPDATE lists SET item_count =
            (SELECT COUNT(*) FROM item_lists WHERE list_type = ?1 AND list_id = ?2)
        WHERE list_type = ?1 AND list_id = ?2
        ",
        params![list_type, list_id],
    )?;

    Ok(item_id)
}

fn collect_lists(conn: &Connection, sql: &str) -> Result<Vec<ListRef>> {
    let mut stmt = conn.prepare(sql)?;

    let rows = stmt.query_map([], |row| {
        Ok(ListRef {
            list_type: row.get(0)?,
            list_id: row.get(1)?,
            user_id: row.get(2)?,
        })
    })?;

    let mut lists = Vec::new();
    for list in rows {
        lists.push(list?);
    }

    Ok(lists)
}

pub fn load_lists(conn: &Connection) -> Result<Vec<ListRef>> {
    collect_lists(
        conn,
        "SELECT list_type, list_id, user_id FROM lists ORDER BY list_type, list_id",
    )
}

/// Lists requested on behalf of someone other than the admin user need approval.
pub fn manual_lists(conn: &Connection) -> Result<Vec<ListRef>> {
    collect_lists(
        conn,
        "
        SELECT list_type, list_id, user_id FROM lists
        WHERE user_id IS NOT NULL AND user_id != '1'
        ORDER BY list_type, list_id
        ",
    )
}

pub fn auto_lists(conn: &Connection) -> Result<Vec<ListRef>> {
    collect_lists(
        conn,
        "
        SELECT list_type, list_id, user_id FROM lists
        WHERE user_id IS NULL OR user_id = '1'
        ORDER BY list_type, list_id
        ",
    )
}

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncedItem> {
    let status: String = row.get(7)?;
    Ok(SyncedItem {
        id: row.get(0)?,
        title: row.get(1)?,
        media_type: row.get(2)?,
        year: row.get(3)?,
        tmdb_id: row.get(4)?,
        imdb_id: row.get(5)?,
        overseerr_id: row.get(6)?,
        status: ItemStatus::parse(&status),
    })
}

pub fn list_items(conn: &Connection, list_type: &str, list_id: &str) -> Result<Vec<SyncedItem>> {
    let mut stmt = conn.prepare(
        "
        SELECT si.id, si.title, si.media_type, si.year, si.tmdb_id, si.imdb_id,
               si.overseerr_id, si.status
        FROM synced_items si
        INNER JOIN item_lists il ON si.id = il.item_id
        WHERE il.list_type = ?1 AND il.list_id = ?2
        ORDER BY si.title
        ",
    )?;

    let rows = stmt.query_map(params![list_type, list_id], map_item)?;

    let mut items = Vec::new();
    for item in rows {
        items.push(item?);
    }

    Ok(items)
}

/// `limit` of `None` returns every matching item.
pub fn items_by_status(
    conn: &Connection,
    status: &ItemStatus,
    limit: Option<usize>,
) -> Result<Vec<SyncedItem>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "
        SELECT id, title, media_type, year, tmdb_id, imdb_id, overseerr_id, status
        FROM synced_items
        WHERE status = ?1
        ORDER BY title
        LIMIT ?2
        ",
    )?;

    let rows = stmt.query_map(params![status.as_str(), limit], map_item)?;

    let mut items = Vec::new();
    for item in rows {
        items.push(item?);
    }

    Ok(items)
}

fn collect_counts(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<BTreeMap<ItemStatus, usize>> {
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (status, count) = row?;
        counts.insert(ItemStatus::parse(&status), count as usize);
    }

    Ok(counts)
}

pub fn status_counts(conn: &Connection) -> Result<BTreeMap<ItemStatus, usize>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM synced_items GROUP BY status")?;
    collect_counts(&mut stmt, [])
}

pub fn status_counts_for_list(
    conn: &Connection,
    list_type: &str,
    list_id: &str,
) -> Result<BTreeMap<ItemStatus, usize>> {
    let mut stmt = conn.prepare(
        "
        SELECT si.status, COUNT(*)
        FROM synced_items si
        INNER JOIN item_lists il ON si.id = il.item_id
        WHERE il.list_type = ?1 AND il.list_id = ?2
        GROUP BY si.status
        ",
    )?;
    collect_counts(&mut stmt, params![list_type, list_id])
}

/// Movie TMDB ids on the given lists. Falls back to the Seerr id, which is the
/// same number for movies; rows with neither are skipped.
pub fn movie_ids_for_lists(conn: &Connection, lists: &[ListRef]) -> Result<BTreeSet<i64>> {
    let mut ids = BTreeSet::new();

    let mut stmt = conn.prepare(
        "
        SELECT DISTINCT COALESCE(si.tmdb_id, CAST(si.overseerr_id AS TEXT))
        FROM synced_items si
        INNER JOIN item_lists il ON si.id = il.item_id
        WHERE il.list_type = ?1
          AND il.list_id = ?2
          AND si.media_type = 'movie'
          AND (si.tmdb_id IS NOT NULL OR si.overseerr_id IS NOT NULL)
        ",
    )?;

    for list in lists {
        let rows = stmt.query_map(params![list.list_type, list.list_id], |row| {
            row.get::<_, Option<String>>(0)
        })?;

        for value in rows {
            if let Some(id) = value?.and_then(|v| v.trim().parse::<i64>().ok()) {
                ids.insert(id);
            }
        }
    }

    Ok(ids)
}

pub fn movie_details(conn: &Connection, tmdb_id: i64) -> Result<Option<MovieDetails>> {
    let details = conn
        .query_row(
            "
            SELECT title, year, status FROM synced_items
            WHERE (tmdb_id = ?1 OR overseerr_id = ?2) AND media_type = 'movie'
            LIMIT 1
            ",
            params![tmdb_id.to_string(), tmdb_id],
            |row| {
                let status: String = row.get(2)?;
                Ok(MovieDetails {
                    title: row.get(0)?,
                    year: row.get(1)?,
                    tmdb_id,
                    status: ItemStatus::parse(&status),
                })
            },
        )
        .optional()?;

    Ok(details)
}

/// Title and year of a synced title, any media type.
pub fn item_title(
    conn: &Connection,
    tmdb_id: i64,
    media_type: MediaType,
) -> Result<Option<(String, Option<i32>)>> {
    let found = conn
        .query_row(
            "
            SELECT title, year FROM synced_items
            WHERE tmdb_id = ?1 AND media_type = ?2
            LIMIT 1
            ",
            params![tmdb_id.to_string(), media_type.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(found)
}

// Returns true if inserted, false if already marked
pub fn mark_request_declined(conn: &Connection, entry: &DeclinedEntry<'_>) -> Result<bool> {
    let affected = conn.execute(
        "
        INSERT OR IGNORE INTO declined_requests
        (tmdb_id, media_type, title, year, declined_at, declined_by_user_id, reason)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            entry.tmdb_id.to_string(),
            entry.media_type.as_str(),
            entry.title,
            entry.year,
            Utc::now().to_rfc3339(),
            entry.declined_by_user_id.map(|id| id.to_string()),
            entry.reason
        ],
    )?;

    Ok(affected > 0)
}

pub fn is_request_declined(conn: &Connection, tmdb_id: i64, media_type: MediaType) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM declined_requests WHERE tmdb_id = ?1 AND media_type = ?2",
            params![tmdb_id.to_string(), media_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(found.is_some())
}

pub fn declined_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM declined_requests", [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn
    }

    pub(crate) fn movie(title: &str, tmdb_id: i64, status: ItemStatus) -> NewItem<'_> {
        NewItem {
            title,
            media_type: MediaType::Movie,
            year: Some(2000),
            tmdb_id: Some(tmdb_id),
            imdb_id: None,
            overseerr_id: None,
            status,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let conn = memory();
        init(&conn).unwrap();
        assert!(load_lists(&conn).unwrap().is_empty());
    }

    #[test]
    fn items_without_tmdb_id_are_not_duplicated() {
        let conn = memory();
        upsert_list(&conn, "mdblist", "family", None).unwrap();

        let by_title = NewItem {
            tmdb_id: None,
            ..movie("Obscure Short", 0, ItemStatus::NotFound)
        };
        let by_imdb = NewItem {
            tmdb_id: None,
            imdb_id: Some("tt0000001"),
            ..movie("Carmencita", 0, ItemStatus::NotFound)
        };

        let first = record_item(&conn, "mdblist", "family", &by_title).unwrap();
        let imdb_first = record_item(&conn, "mdblist", "family", &by_imdb).unwrap();
        assert_ne!(first, imdb_first);

        assert_eq!(record_item(&conn, "mdblist", "family", &by_title).unwrap(), first);
        let renamed = NewItem {
            title: "Carmencita (1894)",
            ..by_imdb.clone()
        };
        assert_eq!(record_item(&conn, "mdblist", "family", &renamed).unwrap(), imdb_first);

        let total: usize = status_counts(&conn).unwrap().values().sum();
        assert_eq!(total, 2);
        assert_eq!(list_items(&conn, "mdblist", "family").unwrap().len(), 2);
    }

    #[test]
    fn status_text_round_trips_and_keeps_unknowns() {
        for s in ["already_available", "blocked", "request_failed"] {
            assert_eq!(ItemStatus::parse(s).as_str(), s);
        }
        assert_eq!(
            ItemStatus::parse("weird"),
            ItemStatus::Other("weird".into())
        );
    }

    #[test]
    fn record_item_dedupes_by_tmdb_and_links_lists() {
        let conn = memory();
        upsert_list(&conn, "mdblist", "a", None).unwrap();
        upsert_list(&conn, "mdblist", "b", Some("2")).unwrap();

        let first = record_item(&conn, "mdblist", "a", &movie("Heat", 949, ItemStatus::Requested)).unwrap();
        let second =
            record_item(&conn, "mdblist", "b", &movie("Heat", 949, ItemStatus::AlreadyAvailable))
                .unwrap();
        assert_eq!(first, second);

        let items = list_items(&conn, "mdblist", "a").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, ItemStatus::AlreadyAvailable);

        let counts = status_counts(&conn).unwrap();
        assert_eq!(counts.get(&ItemStatus::AlreadyAvailable), Some(&1));
        assert_eq!(counts.len(), 1);

        let item_count: i64 = conn
            .query_row(
                "SELECT item_count FROM lists WHERE list_id = 'b'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(item_count, 1);
    }

    #[test]
    fn manual_and_auto_lists_split_on_user_id() {
        let conn = memory();
        upsert_list(&conn, "mdblist", "admin", Some("1")).unwrap();
        upsert_list(&conn, "mdblist", "none", None).unwrap();
        upsert_list(&conn, "mdblist", "kid", Some("2")).unwrap();

        let manual = manual_lists(&conn).unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].list_id, "kid");
        assert_eq!(auto_lists(&conn).unwrap().len(), 2);
    }

    #[test]
    fn movie_ids_fall_back_to_overseerr_id() {
        let conn = memory();
        upsert_list(&conn, "mdblist", "a", None).unwrap();
        record_item(&conn, "mdblist", "a", &movie("One", 1, ItemStatus::Requested)).unwrap();
        record_item(
            &conn,
            "mdblist",
            "a",
            &NewItem {
                tmdb_id: None,
                overseerr_id: Some(2),
                ..movie("Two", 0, ItemStatus::Requested)
            },
        )
        .unwrap();
        record_item(
            &conn,
            "mdblist",
            "a",
            &NewItem {
                media_type: MediaType::Tv,
                ..movie("Show", 3, ItemStatus::Requested)
            },
        )
        .unwrap();

        let lists = load_lists(&conn).unwrap();
        let ids: Vec<i64> = movie_ids_for_lists(&conn, &lists).unwrap().into_iter().collect();
        assert_eq!(ids, vec![1, 2]);

        let details = movie_details(&conn, 2).unwrap().unwrap();
        assert_eq!(details.title, "Two");
        assert!(movie_details(&conn, 3).unwrap().is_none());
    }

    #[test]
    fn items_by_status_respects_limit() {
        let conn = memory();
        upsert_list(&conn, "mdblist", "a", None).unwrap();
        for (i, title) in ["C", "A", "B"].iter().enumerate() {
            record_item(&conn, "mdblist", "a", &movie(title, i as i64, ItemStatus::Blocked)).unwrap();
        }

        let two = items_by_status(&conn, &ItemStatus::Blocked, Some(2)).unwrap();
        assert_eq!(two.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(items_by_status(&conn, &ItemStatus::Blocked, None).unwrap().len(), 3);
    }

    #[test]
    fn declined_requests_are_marked_once() {
        let conn = memory();
        let entry = DeclinedEntry {
            tmdb_id: 42,
            media_type: MediaType::Movie,
            title: Some("Answer"),
            year: None,
            declined_by_user_id: Some(3),
            reason: "Declined in Seerr",
        };

        assert!(!is_request_declined(&conn, 42, MediaType::Movie).unwrap());
        assert!(mark_request_declined(&conn, &entry).unwrap());
        assert!(!mark_request_declined(&conn, &entry).unwrap());
        assert!(is_request_declined(&conn, 42, MediaType::Movie).unwrap());
        assert!(!is_request_declined(&conn, 42, MediaType::Tv).unwrap());
        assert_eq!(declined_count(&conn).unwrap(), 1);
    }
}
