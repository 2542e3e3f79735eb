use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml_edit::{DocumentMut, value};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot edit {path}: {source}")]
    Edit {
        path: PathBuf,
        source: toml_edit::TomlError,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level ingestion config. The account list is read once at startup;
/// edits take effect after a restart.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
    #[serde(default)]
    pub attachment_links: AttachmentLinkConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/vacancies.db")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Sleep used instead of `interval_secs` after a cycle that hit mailbox errors.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_retry_backoff_secs() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

/// The job board that sends application notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorConfig {
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Description given to vacancies created by ingestion; `{title}` is substituted.
    #[serde(default = "default_vacancy_description")]
    pub vacancy_description: String,
}

fn default_sender() -> String {
    "noreply@somon.tj".to_string()
}

fn default_subject_prefix() -> String {
    "Отклик на вакансию".to_string()
}

fn default_vacancy_description() -> String {
    "Вакансия с сайта SomonTj: {title}".to_string()
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            subject_prefix: default_subject_prefix(),
            vacancy_description: default_vacancy_description(),
        }
    }
}

impl VendorConfig {
    /// Mailbox search query. Read state is deliberately not part of it.
    pub fn search_query(&self) -> String {
        format!("from:{} subject:\"{}\"", self.sender, self.subject_prefix)
    }

    pub fn describe_vacancy(&self, title: &str) -> String {
        self.vacancy_description.replace("{title}", title)
    }
}

/// Shape of the browser link synthesized for MIME attachments.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentLinkConfig {
    #[serde(default = "default_link_base")]
    pub base_url: String,
    #[serde(default = "default_link_ik")]
    pub ik: String,
}

fn default_link_base() -> String {
    "https://mail.google.com/mail/u/1".to_string()
}

fn default_link_ik() -> String {
    "21f77b88b6".to_string()
}

impl Default for AttachmentLinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_link_base(),
            ik: default_link_ik(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AccountConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vendor.sender.trim().is_empty() || self.vendor.subject_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "vendor.sender and vendor.subject_prefix must not be empty".into(),
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be positive".into(),
            ));
        }
        if self.schedule.retry_backoff_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.retry_backoff_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.id.trim().is_empty() {
                return Err(ConfigError::Invalid("account id must not be empty".into()));
            }
            if !seen.insert(account.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate account id '{}'",
                    account.id
                )));
            }
            if account.credentials_path.as_os_str().is_empty()
                || account.token_path.as_os_str().is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "account '{}' needs credentials_path and token_path",
                    account.id
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}

/// OAuth client registration, one file per Google Cloud project.
#[derive(Deserialize)]
pub struct OAuthCredentials {
    #[serde(rename = "gmail_oauth")]
    pub gmail: GmailConfig,
}

#[derive(Deserialize)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub urls: AuthUrls,
}

#[derive(Deserialize)]
pub struct AuthUrls {
    pub token_url: String,
    pub auth_url: String,
}

impl Default for AuthUrls {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
        }
    }
}

impl OAuthCredentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_toml(path.as_ref())
    }
}

/// Per-account token file.
#[derive(Deserialize)]
pub struct TokenFile {
    pub tokens: Tokens,
}

#[derive(Deserialize)]
pub struct Tokens {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: String,
    /// Unix seconds; absent means the access token is treated as expired.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_toml(path.as_ref())
    }

    /// Rewrite the access token in place, keeping the rest of the file intact.
    pub fn update_access_token(
        path: impl AsRef<Path>,
        new_token: &str,
        expires_at: Option<i64>,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut doc = content
            .parse::<DocumentMut>()
            .map_err(|source| ConfigError::Edit {
                path: path.to_path_buf(),
                source,
            })?;

        doc["tokens"]["access_token"] = value(new_token);
        if let Some(ts) = expires_at {
            doc["tokens"]["expires_at"] = value(ts);
        }

        fs::write(path, doc.to_string()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
db_path = "state/intake.db"

[schedule]
interval_secs = 120

[[accounts]]
id = "main"
name = "hr@example.com"
credentials_path = "gmail_tokens/credentials.toml"
token_path = "gmail_tokens/token_main.toml"

[[accounts]]
id = "backup"
credentials_path = "gmail_tokens/credentials.toml"
token_path = "gmail_tokens/token_backup.toml"
enabled = false
"#;

    #[test]
    fn test_parse_with_defaults() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("state/intake.db"));
        assert_eq!(cfg.downloads_dir, PathBuf::from("downloads"));
        assert_eq!(cfg.schedule.interval_secs, 120);
        assert_eq!(cfg.schedule.retry_backoff_secs, 60);
        assert_eq!(cfg.vendor.sender, "noreply@somon.tj");
        assert_eq!(cfg.attachment_links.ik, "21f77b88b6");

        let enabled: Vec<_> = cfg.enabled_accounts().map(|a| a.id.as_str()).collect();
        assert_eq!(enabled, vec!["main"]);
        assert_eq!(cfg.accounts[1].display_name(), "backup");
    }

    #[test]
    fn test_search_query() {
        let vendor = VendorConfig::default();
        assert_eq!(
            vendor.search_query(),
            "from:noreply@somon.tj subject:\"Отклик на вакансию\""
        );
        assert_eq!(
            vendor.describe_vacancy("QA"),
            "Вакансия с сайта SomonTj: QA"
        );
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let doubled = format!(
            "{SAMPLE}\n[[accounts]]\nid = \"main\"\ncredentials_path = \"a\"\ntoken_path = \"b\"\n"
        );
        let cfg: Config = toml::from_str(&doubled).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_delays_rejected() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.schedule.retry_backoff_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("retry_backoff_secs")));

        cfg.schedule.retry_backoff_secs = 60;
        cfg.schedule.interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("interval_secs")));
    }

    #[test]
    fn test_update_access_token_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.toml");
        fs::write(
            &path,
            "# issued by setup\n[tokens]\nrefresh_token = \"r-1\"\naccess_token = \"old\"\n",
        )
        .unwrap();

        TokenFile::update_access_token(&path, "new", Some(1_700_000_000)).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# issued by setup"));
        let parsed = TokenFile::load(&path).unwrap();
        assert_eq!(parsed.tokens.refresh_token, "r-1");
        assert_eq!(parsed.tokens.access_token, "new");
        assert_eq!(parsed.tokens.expires_at, Some(1_700_000_000));
    }
}
