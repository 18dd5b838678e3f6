use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub radarr: RadarrConfig,
    pub seerr: SeerrConfig,
    pub tmdb_key: Option<String>,
    pub blocklist: BlocklistConfig,
    pub database_path: PathBuf,
    pub data_dir: PathBuf,
    pub mail: MailConfig,
    pub email_report_enabled: bool,
    pub report_max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadarrConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeerrConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    pub path: PathBuf,
    pub enabled: bool,
    pub reload_hours: u64,
    pub block_documentaries: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub starttls: bool,
    pub from: String,
    pub to: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            radarr: RadarrConfig::default(),
            seerr: SeerrConfig::default(),
            tmdb_key: None,
            blocklist: BlocklistConfig::default(),
            database_path: PathBuf::from("data/list_sync.db"),
            data_dir: PathBuf::from("data"),
            mail: MailConfig::default(),
            email_report_enabled: false,
            report_max_items: 5,
        }
    }
}

impl Default for RadarrConfig {
    fn default() -> Self {
        Self {
            url: "http://radarr:7878".into(),
            api_key: None,
        }
    }
}

impl Default for SeerrConfig {
    fn default() -> Self {
        Self {
            url: "http://jellyseerr:5055".into(),
            api_key: None,
        }
    }
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/blacklist.json"),
            enabled: true,
            reload_hours: 24,
            block_documentaries: false,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            starttls: true,
            from: "list-sync@example.local".into(),
            to: None,
        }
    }
}

impl Config {
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.reports_dir().join("outbox")
    }

    /// Blank optional values from a config file count as unset, same as the environment.
    fn drop_empty_strings(&mut self) {
        for value in [
            &mut self.radarr.api_key,
            &mut self.seerr.api_key,
            &mut self.tmdb_key,
            &mut self.mail.smtp_host,
            &mut self.mail.smtp_user,
            &mut self.mail.smtp_password,
            &mut self.mail.to,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
    }

    /// Overlay values from an environment-style map. Empty values count as unset.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("RADARR_URL") {
            self.radarr.url = v;
        }
        if let Some(v) = get("RADARR_API_KEY") {
            self.radarr.api_key = Some(v);
        }
        if let Some(v) = get("OVERSEERR_URL").or_else(|| get("SEERR_URL")) {
            self.seerr.url = v;
        }
        if let Some(v) = get("OVERSEERR_API_KEY").or_else(|| get("SEERR_API_KEY")) {
            self.seerr.api_key = Some(v);
        }
        if let Some(v) = get("TMDB_KEY") {
            self.tmdb_key = Some(v);
        }

        if let Some(v) = get("BLOCKLIST_FILE") {
            self.blocklist.path = PathBuf::from(v);
        }
        if let Some(v) = get("BLOCKLIST_ENABLED") {
            self.blocklist.enabled = flag(&v);
        }
        if let Some(v) = get("BLOCKLIST_RELOAD_HOURS") {
            self.blocklist.reload_hours = number_or("BLOCKLIST_RELOAD_HOURS", &v, 24);
        }
        if let Some(v) = get("BLOCK_DOCUMENTARIES") {
            self.blocklist.block_documentaries = flag(&v);
        }

        if let Some(v) = get("DB_FILE") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }

        if let Some(v) = get("SMTP_HOST") {
            self.mail.smtp_host = Some(v);
        }
        if let Some(v) = get("SMTP_PORT") {
            self.mail.smtp_port = number_or("SMTP_PORT", &v, 587);
        }
        if let Some(v) = get("SMTP_USER") {
            self.mail.smtp_user = Some(v);
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            self.mail.smtp_password = Some(v);
        }
        if let Some(v) = get("SMTP_STARTTLS") {
            self.mail.starttls = truthy(&v);
        }
        if let Some(v) = get("MAIL_FROM") {
            self.mail.from = v;
        }
        if let Some(v) = get("MAIL_TO") {
            self.mail.to = Some(v);
        }

        if let Some(v) = get("EMAIL_REPORT_ENABLED") {
            self.email_report_enabled = flag(&v);
        }
        if let Some(v) = get("REPORT_MAX_ITEMS") {
            self.report_max_items = number_or("REPORT_MAX_ITEMS", &v, 5);
        }
    }
}

// Defaults, then the optional JSON file, then the process environment.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    config.drop_empty_strings();

    let vars: HashMap<String, String> = std::env::vars().collect();
    config.apply_env(&vars);

    Ok(config)
}

fn flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn number_or<T: FromStr + Copy + std::fmt::Display>(key: &str, value: &str, fallback: T) -> T {
    value.parse().unwrap_or_else(|_| {
        warn!("{key}={value:?} is not a valid number, using {fallback}");
        fallback
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_deployment_layout() {
        let config = Config::default();
        assert_eq!(config.radarr.url, "http://radarr:7878");
        assert_eq!(config.blocklist.path, PathBuf::from("data/blacklist.json"));
        assert_eq!(config.blocklist.reload_hours, 24);
        assert!(config.blocklist.enabled);
        assert!(!config.blocklist.block_documentaries);
        assert_eq!(config.mail.smtp_port, 587);
        assert!(config.mail.starttls);
        assert_eq!(config.outbox_dir(), PathBuf::from("data/reports/outbox"));
    }

    #[test]
    fn env_overrides_and_empty_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(&vars(&[
            ("RADARR_API_KEY", "abc"),
            ("MAIL_TO", ""),
            ("BLOCKLIST_ENABLED", "FALSE"),
            ("BLOCK_DOCUMENTARIES", "True"),
            ("SMTP_STARTTLS", "off"),
            ("SEERR_URL", "http://seerr:5055"),
        ]));

        assert_eq!(config.radarr.api_key.as_deref(), Some("abc"));
        assert_eq!(config.mail.to, None);
        assert!(!config.blocklist.enabled);
        assert!(config.blocklist.block_documentaries);
        assert!(!config.mail.starttls);
        assert_eq!(config.seerr.url, "http://seerr:5055");
    }

    #[test]
    fn overseerr_keys_win_over_seerr_aliases() {
        let mut config = Config::default();
        config.apply_env(&vars(&[
            ("OVERSEERR_URL", "http://overseerr:5055"),
            ("SEERR_URL", "http://seerr:5055"),
        ]));
        assert_eq!(config.seerr.url, "http://overseerr:5055");
    }

    #[test]
    fn bad_numbers_fall_back() {
        let mut config = Config::default();
        config.apply_env(&vars(&[
            ("SMTP_PORT", "not-a-port"),
            ("BLOCKLIST_RELOAD_HOURS", "6"),
        ]));
        assert_eq!(config.mail.smtp_port, 587);
        assert_eq!(config.blocklist.reload_hours, 6);
    }

    #[test]
    fn json_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "radarr": { "api_key": "k" }, "report_max_items": 10 }"#).unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.radarr.url, "http://radarr:7878");
        assert!(config.radarr.api_key.is_some());
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn blank_strings_in_json_file_count_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "mail": { "to": "", "smtp_host": "  " }, "tmdb_key": "" }"#).unwrap();

        let mut config: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.mail.to.as_deref(), Some(""));
        config.drop_empty_strings();
        assert_eq!(config.mail.to, None);
        assert_eq!(config.mail.smtp_host, None);
        assert_eq!(config.tmdb_key, None);
    }

    #[test]
    fn load_reports_which_file_failed() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.json");
        let err = load(Some(&missing)).unwrap_err();
        assert!(format!("{err:#}").contains("reading config"));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ nope").unwrap();
        let err = load(Some(&broken)).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
        assert!(err.to_string().contains("broken.json"));
    }
}
