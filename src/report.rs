//! Status reports built from the local store: per-list coverage, overall
//! totals, sample titles per problem category, rendered as HTML for mail or
//! as plain text for the console.

use anyhow::Result;
use chrono::{Local, NaiveDate};
use minijinja::{Environment, context};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{self, ItemStatus, SyncedItem};
use crate::mail::{self, Delivery, MailAttachment};

const DISPLAY_NAME_CHARS: usize = 40;
const SENT_MARKER: &str = ".last_report_sent";

fn pct(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Status tallies collapsed into the buckets shown in reports.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Buckets {
    pub total: usize,
    pub in_library: usize,
    pub pending: usize,
    pub blocked: usize,
    pub not_found: usize,
    pub errors: usize,
}

impl Buckets {
    pub fn from_counts(counts: &BTreeMap<ItemStatus, usize>) -> Self {
        let get = |status: ItemStatus| counts.get(&status).copied().unwrap_or(0);

        Self {
            total: counts.values().sum(),
            in_library: get(ItemStatus::AlreadyAvailable) + get(ItemStatus::Skipped),
            pending: get(ItemStatus::AlreadyRequested) + get(ItemStatus::Requested),
            blocked: get(ItemStatus::Blocked),
            not_found: get(ItemStatus::NotFound),
            errors: get(ItemStatus::Error) + get(ItemStatus::RequestFailed),
        }
    }

    pub fn missing(&self) -> usize {
        self.total - self.in_library
    }

    pub fn coverage_pct(&self) -> f64 {
        pct(self.in_library, self.total)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListBreakdown {
    pub name: String,
    pub list_type: String,
    pub total: usize,
    pub in_library: usize,
    pub missing: usize,
    pub coverage_pct: f64,
    pub coverage_label: String,
    pub pending: usize,
    pub blocked: usize,
    pub not_found: usize,
    pub errors: usize,
}

impl ListBreakdown {
    fn new(name: String, list_type: String, buckets: Buckets) -> Self {
        let coverage_pct = buckets.coverage_pct();
        Self {
            name,
            list_type,
            total: buckets.total,
            in_library: buckets.in_library,
            missing: buckets.missing(),
            coverage_pct,
            coverage_label: format!("{coverage_pct:.1}"),
            pending: buckets.pending,
            blocked: buckets.blocked,
            not_found: buckets.not_found,
            errors: buckets.errors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub total_items: usize,
    pub in_library: usize,
    pub pending: usize,
    pub blocked: usize,
    pub not_found: usize,
    pub errors: usize,
    pub in_library_pct: String,
    pub pending_pct: String,
    pub blocked_pct: String,
}

impl SyncSummary {
    pub fn from_buckets(b: Buckets) -> Self {
        Self {
            total_items: b.total,
            in_library: b.in_library,
            pending: b.pending,
            blocked: b.blocked,
            not_found: b.not_found,
            errors: b.errors,
            in_library_pct: format!("{:.1}", pct(b.in_library, b.total)),
            pending_pct: format!("{:.1}", pct(b.pending, b.total)),
            blocked_pct: format!("{:.1}", pct(b.blocked, b.total)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportItem {
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub label: &'static str,
    pub total: usize,
    pub items: Vec<ReportItem>,
}

/// List ids that are MDBList-style URLs read better as their last segment.
pub fn display_name(list_id: &str) -> String {
    if list_id.contains("external/") {
        let last = list_id.trim_end_matches('/').rsplit('/').next().unwrap_or(list_id);
        return format!("List {last}");
    }

    let count = list_id.chars().count();
    if count > DISPLAY_NAME_CHARS {
        list_id.chars().skip(count - DISPLAY_NAME_CHARS).collect()
    } else {
        list_id.to_string()
    }
}

pub fn build_breakdown(conn: &Connection) -> Result<Vec<ListBreakdown>> {
    let mut breakdown = Vec::new();

    for list in db::load_lists(conn)? {
        match db::status_counts_for_list(conn, &list.list_type, &list.list_id) {
            Ok(counts) => breakdown.push(ListBreakdown::new(
                display_name(&list.list_id),
                list.list_type.clone(),
                Buckets::from_counts(&counts),
            )),
            Err(e) => warn!(
                "Failed to get stats for list {}:{}: {e}",
                list.list_type, list.list_id
            ),
        }
    }

    breakdown.sort_by(|a, b| a.coverage_pct.total_cmp(&b.coverage_pct));

    Ok(breakdown)
}

pub fn summary(conn: &Connection) -> Result<SyncSummary> {
    Ok(SyncSummary::from_buckets(Buckets::from_counts(
        &db::status_counts(conn)?,
    )))
}

fn seerr_link(seerr_url: Option<&str>, item: &SyncedItem) -> Option<String> {
    let base = seerr_url?.trim_end_matches('/');
    let id = item
        .tmdb_id
        .clone()
        .or_else(|| item.overseerr_id.map(|id| id.to_string()))?;
    Some(format!("{base}/{}/{id}", item.media_type))
}

/// Problem categories with up to `limit` titles each (`None` for all).
pub fn categories(
    conn: &Connection,
    seerr_url: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<Category>> {
    let groups: [(&'static str, &[ItemStatus]); 4] = [
        (
            "Pending Download",
            &[ItemStatus::AlreadyRequested, ItemStatus::Requested],
        ),
        ("Blocked", &[ItemStatus::Blocked]),
        ("Not Found", &[ItemStatus::NotFound]),
        ("Errors", &[ItemStatus::Error, ItemStatus::RequestFailed]),
    ];

    let counts = db::status_counts(conn)?;
    let mut result = Vec::new();

    for (label, statuses) in groups {
        let total = statuses
            .iter()
            .map(|s| counts.get(s).copied().unwrap_or(0))
            .sum();

        let mut items = Vec::new();
        for status in statuses {
            let remaining = limit.map(|l| l.saturating_sub(items.len()));
            if remaining == Some(0) {
                break;
            }
            for item in db::items_by_status(conn, status, remaining)? {
                items.push(ReportItem {
                    link: seerr_link(seerr_url, &item),
                    title: item.title,
                    year: item.year,
                    tmdb_id: item.tmdb_id,
                });
            }
        }

        result.push(Category {
            label,
            total,
            items,
        });
    }

    Ok(result)
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("base.html", include_str!("../templates/base.html"))?;
    env.add_template(
        "email_report.html",
        include_str!("../templates/email_report.html"),
    )?;
    env.add_template(
        "full_report.html",
        include_str!("../templates/full_report.html"),
    )?;
    Ok(env)
}

fn render(
    template: &str,
    title: &str,
    summary: &SyncSummary,
    lists: &[ListBreakdown],
    categories: &[Category],
) -> Result<String> {
    let env = environment()?;
    let html = env.get_template(template)?.render(context! {
        title,
        generated_at => Local::now().format("%B %d, %Y at %H:%M").to_string(),
        summary,
        lists,
        categories,
    })?;
    Ok(html)
}

pub fn render_email_html(
    summary: &SyncSummary,
    lists: &[ListBreakdown],
    categories: &[Category],
) -> Result<String> {
    render("email_report.html", "List-Sync Report", summary, lists, categories)
}

pub fn render_full_html(
    summary: &SyncSummary,
    lists: &[ListBreakdown],
    categories: &[Category],
) -> Result<String> {
    render(
        "full_report.html",
        "List-Sync Complete Report",
        summary,
        lists,
        categories,
    )
}

/// Complete report straight from the database, every title included.
pub fn full_report(conn: &Connection, seerr_url: Option<&str>) -> Result<String> {
    render_full_html(
        &summary(conn)?,
        &build_breakdown(conn)?,
        &categories(conn, seerr_url, None)?,
    )
}

fn why_missing(
    out: &mut String,
    indent: &str,
    counts: &BTreeMap<ItemStatus, usize>,
    of: Option<usize>,
) -> fmt::Result {
    let rows = [
        (ItemStatus::AlreadyRequested, "Requested (pending download)"),
        (ItemStatus::Requested, "Newly requested"),
        (ItemStatus::Blocked, "Blocked by blocklist"),
        (ItemStatus::NotFound, "Not found (couldn't match)"),
        (ItemStatus::Error, "Processing error"),
        (ItemStatus::RequestFailed, "Request failed"),
    ];

    for (status, label) in rows {
        let count = counts.get(&status).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        match of {
            Some(missing) => writeln!(out, "{indent}{label}: {count} ({:.1}%)", pct(count, missing))?,
            None => writeln!(out, "{indent}{label}: {count}")?,
        }
    }
    Ok(())
}

/// Console breakdown per list plus grand totals.
pub fn render_text_breakdown(conn: &Connection) -> Result<String> {
    let rule = "=".repeat(80);
    let mut out = String::new();
    let lists = db::load_lists(conn)?;

    writeln!(out, "{rule}\nLIST BREAKDOWN REPORT\n{rule}\n")?;
    writeln!(out, "Total lists configured: {}\n", lists.len())?;

    let mut grand: BTreeMap<ItemStatus, usize> = BTreeMap::new();

    for list in &lists {
        let counts = db::status_counts_for_list(conn, &list.list_type, &list.list_id)?;
        let b = Buckets::from_counts(&counts);

        writeln!(
            out,
            "{}: {}",
            list.list_type.to_uppercase(),
            display_name(&list.list_id)
        )?;
        writeln!(out, "   Total: {}", b.total)?;
        writeln!(
            out,
            "   In library: {} ({:.1}%)",
            b.in_library,
            pct(b.in_library, b.total)
        )?;
        writeln!(
            out,
            "   Missing: {} ({:.1}%)",
            b.missing(),
            pct(b.missing(), b.total)
        )?;
        if b.missing() > 0 {
            writeln!(out, "   Missing breakdown:")?;
            why_missing(&mut out, "      ", &counts, None)?;
        }
        out.push('\n');

        for (status, count) in counts {
            *grand.entry(status).or_default() += count;
        }
    }

    let b = Buckets::from_counts(&grand);
    writeln!(out, "{rule}\nGRAND TOTALS (All Lists Combined)\n{rule}\n")?;
    writeln!(out, "Total items: {}", b.total)?;
    writeln!(
        out,
        "In library: {} ({:.1}%)",
        b.in_library,
        pct(b.in_library, b.total)
    )?;
    writeln!(
        out,
        "Missing: {} ({:.1}%)\n",
        b.missing(),
        pct(b.missing(), b.total)
    )?;
    if b.missing() > 0 {
        writeln!(out, "Why missing:")?;
        why_missing(&mut out, "   ", &grand, Some(b.missing()))?;
    }

    Ok(out)
}

/// Status counts plus a few sample titles from the problem statuses.
pub fn db_status_text(conn: &Connection) -> Result<String> {
    let mut out = String::new();

    writeln!(out, "Status breakdown in database:\n{}", "=".repeat(50))?;
    for (status, count) in db::status_counts(conn)? {
        writeln!(out, "{:<20}: {count:>5} items", status.as_str())?;
    }
    writeln!(out, "Declined requests tracked: {}", db::declined_count(conn)?)?;

    writeln!(out, "\nSample items from each status:\n{}", "=".repeat(50))?;
    for status in [
        ItemStatus::AlreadyRequested,
        ItemStatus::Blocked,
        ItemStatus::NotFound,
        ItemStatus::Error,
    ] {
        for item in db::items_by_status(conn, &status, Some(5))? {
            let year = item.year.map(|y| format!(" ({y})")).unwrap_or_default();
            writeln!(out, "{:<20}: {}{year}", status.as_str(), item.title)?;
        }
    }

    Ok(out)
}

/// One-bit "already sent today" flag stored as a date in a marker file.
pub struct SentMarker {
    path: PathBuf,
}

impl SentMarker {
    pub fn new(reports_dir: &Path) -> Self {
        Self {
            path: reports_dir.join(SENT_MARKER),
        }
    }

    pub fn already_sent(&self, today: NaiveDate) -> bool {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            == Some(today)
    }

    pub fn mark_sent(&self, today: NaiveDate) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, today.format("%Y-%m-%d").to_string())?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
pub enum ReportOutcome {
    Disabled,
    AlreadySentToday,
    Delivered(Delivery),
}

pub async fn send_report(config: &Config, conn: &Connection, force: bool) -> Result<ReportOutcome> {
    if !config.email_report_enabled {
        info!("Email reports disabled (EMAIL_REPORT_ENABLED=false)");
        return Ok(ReportOutcome::Disabled);
    }

    let marker = SentMarker::new(&config.reports_dir());
    let today = Local::now().date_naive();
    if !force && marker.already_sent(today) {
        info!("Report already sent today, skipping");
        return Ok(ReportOutcome::AlreadySentToday);
    }

    let seerr_url = Some(config.seerr.url.as_str()).filter(|u| !u.is_empty());
    let summary = summary(conn)?;
    let lists = build_breakdown(conn)?;

    let html = render_email_html(
        &summary,
        &lists,
        &categories(conn, seerr_url, Some(config.report_max_items))?,
    )?;
    let full = render_full_html(&summary, &lists, &categories(conn, seerr_url, None)?)?;
    info!(
        "Report generated: {} bytes email, {} bytes attachment",
        html.len(),
        full.len()
    );

    let now = Local::now();
    let subject = format!("List-Sync Report - {}", now.format("%Y-%m-%d %H:%M"));
    let attachment = MailAttachment {
        filename: format!("ListSync_Complete_Report_{}.html", now.format("%Y%m%d_%H%M")),
        content_type: "text/html; charset=utf-8".into(),
        data: full.into_bytes(),
    };

    let delivery = mail::send_email(
        &config.mail,
        &config.outbox_dir(),
        &subject,
        &html,
        true,
        Some(&attachment),
    )
    .await?;

    match &delivery {
        Delivery::Sent | Delivery::Saved(_) => marker.mark_sent(today)?,
        Delivery::Disabled => warn!("Report not delivered (MAIL_TO not configured?)"),
    }

    Ok(ReportOutcome::Delivered(delivery))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{memory, movie};
    use scraper::{Html, Selector};

    fn seeded() -> Connection {
        let conn = memory();
        db::upsert_list(&conn, "mdblist", "https://mdblist.com/lists/u/external/12345", None).unwrap();
        db::upsert_list(&conn, "mdblist", "good", None).unwrap();

        let bad = "https://mdblist.com/lists/u/external/12345";
        db::record_item(&conn, "mdblist", bad, &movie("Alien", 348, ItemStatus::AlreadyAvailable)).unwrap();
        db::record_item(&conn, "mdblist", bad, &movie("Brazil", 68, ItemStatus::AlreadyRequested)).unwrap();
        db::record_item(&conn, "mdblist", bad, &movie("Cobra <1986>", 9, ItemStatus::Blocked)).unwrap();
        db::record_item(&conn, "mdblist", bad, &movie("Dune", 438631, ItemStatus::RequestFailed)).unwrap();

        db::record_item(&conn, "mdblist", "good", &movie("Alien", 348, ItemStatus::AlreadyAvailable)).unwrap();
        db::record_item(&conn, "mdblist", "good", &movie("Heat", 949, ItemStatus::Skipped)).unwrap();
        conn
    }

    #[test]
    fn display_names() {
        assert_eq!(display_name("https://mdblist.com/lists/u/external/12345"), "List 12345");
        assert_eq!(display_name("short"), "short");
        let long = format!("{}{}", "a".repeat(10), "b".repeat(40));
        assert_eq!(display_name(&long), "b".repeat(40));
    }

    #[test]
    fn buckets_group_statuses() {
        let counts: BTreeMap<ItemStatus, usize> = [
            (ItemStatus::AlreadyAvailable, 3),
            (ItemStatus::Skipped, 1),
            (ItemStatus::Requested, 2),
            (ItemStatus::Error, 1),
            (ItemStatus::RequestFailed, 1),
            (ItemStatus::Other("mystery".into()), 2),
        ]
        .into_iter()
        .collect();

        let b = Buckets::from_counts(&counts);
        assert_eq!(b.total, 10);
        assert_eq!(b.in_library, 4);
        assert_eq!(b.pending, 2);
        assert_eq!(b.errors, 2);
        assert_eq!(b.missing(), 6);
        assert_eq!(b.coverage_pct(), 40.0);
        assert_eq!(Buckets::default().coverage_pct(), 0.0);
    }

    #[test]
    fn breakdown_is_sorted_worst_first() {
        let conn = seeded();
        let lists = build_breakdown(&conn).unwrap();

        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].name, "List 12345");
        assert_eq!(lists[0].coverage_label, "25.0");
        assert_eq!((lists[0].pending, lists[0].blocked, lists[0].errors), (1, 1, 1));
        assert_eq!(lists[1].name, "good");
        assert_eq!(lists[1].coverage_label, "100.0");
    }

    #[test]
    fn categories_respect_limit_and_link_to_seerr() {
        let conn = seeded();
        let cats = categories(&conn, Some("http://seerr:5055/"), Some(1)).unwrap();

        let blocked = cats.iter().find(|c| c.label == "Blocked").unwrap();
        assert_eq!(blocked.total, 1);
        assert_eq!(
            blocked.items[0].link.as_deref(),
            Some("http://seerr:5055/movie/9")
        );

        let none = categories(&conn, None, Some(0)).unwrap();
        assert!(none.iter().all(|c| c.items.is_empty()));
    }

    #[test]
    fn email_html_escapes_titles_and_lists_every_list() {
        let conn = seeded();
        let html = render_email_html(
            &summary(&conn).unwrap(),
            &build_breakdown(&conn).unwrap(),
            &categories(&conn, None, Some(5)).unwrap(),
        )
        .unwrap();

        assert!(html.contains("Cobra &lt;1986&gt;"));

        let doc = Html::parse_document(&html);
        let lists = Selector::parse(".list-item").unwrap();
        assert_eq!(doc.select(&lists).count(), 2);
        let titles = Selector::parse("#categories .title").unwrap();
        assert_eq!(doc.select(&titles).count(), 3);
    }

    #[test]
    fn full_report_includes_all_items_with_links() {
        let conn = seeded();
        let html = full_report(&conn, Some("http://seerr:5055")).unwrap();

        let doc = Html::parse_document(&html);
        let links = Selector::parse("#categories a").unwrap();
        let hrefs: Vec<_> = doc
            .select(&links)
            .filter_map(|a| a.value().attr("href"))
            .collect();
        assert!(hrefs.contains(&"http://seerr:5055/movie/438631"));
        assert_eq!(hrefs.len(), 3);
    }

    #[test]
    fn text_breakdown_reports_grand_totals() {
        let conn = seeded();
        let text = render_text_breakdown(&conn).unwrap();

        assert!(text.contains("Total lists configured: 2"));
        assert!(text.contains("MDBLIST: List 12345"));
        // Alien counts once per list it appears on.
        assert!(text.contains("Total items: 6"));
        assert!(text.contains("Blocked by blocklist: 1 (33.3%)"));
    }

    #[test]
    fn db_status_lists_counts_and_samples() {
        let conn = seeded();
        let text = db_status_text(&conn).unwrap();
        assert!(text.contains("blocked"));
        assert!(text.contains("Cobra <1986> (2000)"));
        assert!(text.contains("Declined requests tracked: 0"));
    }

    #[test]
    fn sent_marker_is_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SentMarker::new(&dir.path().join("reports"));
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        assert!(!marker.already_sent(today));
        marker.mark_sent(today).unwrap();
        assert!(marker.already_sent(today));
        assert!(!marker.already_sent(today.succ_opt().unwrap()));
        marker.clear().unwrap();
        assert!(!marker.already_sent(today));
    }

    #[tokio::test]
    async fn report_respects_enable_flag_and_daily_marker() {
        let dir = tempfile::tempdir().unwrap();
        let conn = seeded();
        let mut config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        assert_eq!(
            send_report(&config, &conn, false).await.unwrap(),
            ReportOutcome::Disabled
        );

        config.email_report_enabled = true;
        config.mail.to = Some("ops@example.com".into());

        let first = send_report(&config, &conn, false).await.unwrap();
        let ReportOutcome::Delivered(Delivery::Saved(path)) = first else {
            panic!("expected report in outbox, got {first:?}");
        };
        assert!(path.starts_with(config.outbox_dir()));

        assert_eq!(
            send_report(&config, &conn, false).await.unwrap(),
            ReportOutcome::AlreadySentToday
        );
        assert!(matches!(
            send_report(&config, &conn, true).await.unwrap(),
            ReportOutcome::Delivered(Delivery::Saved(_))
        ));
    }
}
