use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::db;
use crate::error::{AppError, Result};
use crate::feed::RetryPolicy;
use crate::services::mailer;

pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;
pub const INTERVAL_RANGE: RangeInclusive<u32> = 1..=100;

/// Feed keys double as table names, so they must be plain identifiers.
const FEED_KEY_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_]*$";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Minutes between polling cycles; `--interval` takes precedence.
    pub interval_minutes: Option<u32>,

    #[serde(default)]
    pub database: DatabaseConfig,

    pub email: EmailConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    /// Feed key to feed URL. Iterated in key order.
    pub feeds: BTreeMap<String, String>,

    /// Feed key to raw `key=value; key=value` cookie string.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Address alerts are sent to.
    pub receiver: String,
    /// Sender account; also the SMTP login.
    pub username: String,
    pub password: String,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_secs))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feed-monitor");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db")
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| AppError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(AppError::config("[feeds] must list at least one feed"));
        }

        let key_re = Regex::new(FEED_KEY_PATTERN).map_err(|e| AppError::config(e.to_string()))?;
        let mut tables: HashMap<String, &str> = HashMap::new();
        for (key, url) in &self.feeds {
            if !key_re.is_match(key) {
                return Err(AppError::config(format!(
                    "feed key {:?} must start with a letter and contain only letters, digits and '_'",
                    key
                )));
            }
            let table = db::table_name(key);
            if db::is_reserved_table(&table) {
                return Err(AppError::config(format!(
                    "feed key {:?} maps to the reserved table name {}",
                    key, table
                )));
            }
            if let Some(other) = tables.insert(table, key) {
                return Err(AppError::config(format!(
                    "feed keys {:?} and {:?} differ only in case",
                    other, key
                )));
            }
            validate_feed_url(key, url)?;
        }

        for (key, cookies) in &self.cookies {
            if !self.feeds.contains_key(key) {
                return Err(AppError::config(format!(
                    "cookies given for unknown feed {:?}",
                    key
                )));
            }
            parse_cookie_pairs(cookies).map_err(|e| {
                AppError::config(format!("cookies for feed {:?}: {}", key, e))
            })?;
        }

        if let Some(minutes) = self.interval_minutes {
            validate_interval(minutes)?;
        }

        if self.fetch.timeout_secs == 0 {
            return Err(AppError::config("fetch.timeout_secs must be at least 1"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(AppError::config("fetch.max_attempts must be at least 1"));
        }

        mailer::smtp_endpoint(&self.email)?;
        mailer::parse_mailbox(&self.email.username)?;
        mailer::parse_mailbox(&self.email.receiver)?;

        Ok(())
    }

    /// Time between polling cycles: the CLI value, else the configured one,
    /// else [`DEFAULT_INTERVAL_MINUTES`].
    pub fn poll_interval(&self, override_minutes: Option<u32>) -> Result<Duration> {
        let minutes = override_minutes
            .or(self.interval_minutes)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);
        validate_interval(minutes)?;
        Ok(Duration::from_secs(u64::from(minutes) * 60))
    }

    pub fn feeds(&self) -> impl Iterator<Item = (&str, &str)> {
        self.feeds.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn cookies_for(&self, feed_key: &str) -> Option<&str> {
        self.cookies.get(feed_key).map(String::as_str)
    }
}

fn validate_interval(minutes: u32) -> Result<()> {
    if INTERVAL_RANGE.contains(&minutes) {
        Ok(())
    } else {
        Err(AppError::config(format!(
            "interval must be between {} and {} minutes, got {}",
            INTERVAL_RANGE.start(),
            INTERVAL_RANGE.end(),
            minutes
        )))
    }
}

fn validate_feed_url(key: &str, url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| AppError::config(format!("feed {:?} has invalid URL {:?}: {}", key, url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::config(format!(
            "feed {:?} uses unsupported scheme {:?}",
            key, scheme
        ))),
    }
}

/// Splits a `key=value; key=value` cookie string into pairs.
pub fn parse_cookie_pairs(raw: &str) -> std::result::Result<Vec<(&str, &str)>, String> {
    if raw.chars().any(|c| c.is_control() || !c.is_ascii()) {
        return Err("cookie string must be printable ASCII".to_string());
    }
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
            _ => Err(format!("expected key=value, got {:?}", pair)),
        })
        .collect()
}
