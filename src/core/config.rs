use crate::core::model::{Category, Group, Holding};
use crate::core::price::SourceKind;
use anyhow::{Context, Result, anyhow};
use chrono::FixedOffset;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fmt, fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_CRON: &str = "0 3 * * 0";

#[derive(Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

// The API key never reaches logs
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Fixed UTC offset the cron expression is evaluated in, e.g. `-03:00`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_cron() -> String {
    DEFAULT_CRON.to_string()
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
        }
    }
}

impl ScheduleConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
    }
}

/// Parses `Z`, `UTC` or a `+HH:MM` / `-HH:MM` offset.
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("Invalid UTC offset"));
    }
    value
        .parse::<FixedOffset>()
        .map_err(|e| anyhow!("Invalid timezone offset '{value}': {e}"))
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValuationConfig {
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

fn default_request_delay_ms() -> u64 {
    200
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl SourceConfig {
    pub fn defaults_for(kind: SourceKind) -> Self {
        let (timeout_secs, cache_ttl_secs) = match kind {
            SourceKind::Equity => (15, 5 * 60),
            SourceKind::DepositaryReceipt => (15, 10 * 60),
            SourceKind::Crypto => (10, 3 * 60),
        };
        Self {
            timeout_secs,
            cache_ttl_secs,
            user_agent: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_equity")]
    pub equity: SourceConfig,
    #[serde(default = "default_cedears")]
    pub cedears: SourceConfig,
    #[serde(default = "default_crypto")]
    pub crypto: SourceConfig,
}

fn default_equity() -> SourceConfig {
    SourceConfig::defaults_for(SourceKind::Equity)
}

fn default_cedears() -> SourceConfig {
    SourceConfig::defaults_for(SourceKind::DepositaryReceipt)
}

fn default_crypto() -> SourceConfig {
    SourceConfig::defaults_for(SourceKind::Crypto)
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            equity: default_equity(),
            cedears: default_cedears(),
            crypto: default_crypto(),
        }
    }
}

impl ProvidersConfig {
    pub fn for_kind(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Equity => &self.equity,
            SourceKind::DepositaryReceipt => &self.cedears,
            SourceKind::Crypto => &self.crypto,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HoldingSeed {
    pub id: String,
    pub name: String,
    pub code: String,
    pub quantity: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GroupSeed {
    pub id: String,
    pub name: String,
    pub category_id: String,
    #[serde(default)]
    pub holdings: Vec<HoldingSeed>,
}

impl GroupSeed {
    pub fn group(&self) -> Group {
        Group {
            id: self.id.clone(),
            name: self.name.clone(),
            category_id: self.category_id.clone(),
        }
    }

    pub fn holdings(&self) -> impl Iterator<Item = Holding> + '_ {
        self.holdings
            .iter()
            .map(|h| Holding::new(&h.id, &h.name, &h.code, &self.id, h.quantity))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub data_path: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "holdsnap", "holdsnap")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "holdsnap", "holdsnap")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(api_key) = lookup("SNAPSHOT_SERVICE_API_KEY") {
            self.server.api_key = Some(api_key);
        }
        if let Some(cron) = lookup("SCRAPING_CRON_SCHEDULE") {
            self.schedule.cron = cron;
        }
        if let Some(timezone) = lookup("SCHEDULE_TIMEZONE") {
            self.schedule.timezone = timezone;
        }
        if let Some(addr) = lookup("LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
    }

    /// Secret required before accepting traffic.
    pub fn require_api_key(&self) -> Result<&str> {
        self.server
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("An API key is required: set server.api_key or SNAPSHOT_SERVICE_API_KEY"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
server:
  listen_addr: "127.0.0.1:9000"
  api_key: "secret"
schedule:
  cron: "0 1 * * 0"
  timezone: "-03:00"
providers:
  crypto:
    timeout_secs: 5
    cache_ttl_secs: 60
categories:
  - id: "cat-cedears"
    name: "Cedears"
    source_endpoint: "https://api.example.com/cedears"
    currency: "ARS"
groups:
  - id: "g1"
    name: "MIS CEDEARS"
    category_id: "cat-cedears"
    holdings:
      - id: "h1"
        name: "Apple"
        code: "AAPL"
        quantity: 10.5
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.require_api_key().unwrap(), "secret");
        assert_eq!(config.schedule.cron, "0 1 * * 0");
        assert_eq!(
            config.schedule.offset().unwrap(),
            FixedOffset::west_opt(3 * 3600).unwrap()
        );
        assert_eq!(config.providers.crypto.timeout(), Duration::from_secs(5));
        // Unspecified providers keep their defaults
        assert_eq!(config.providers.equity.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.providers.cedears.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.valuation.request_delay_ms, 200);

        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.groups[0].group().name, "MIS CEDEARS");
        let holdings: Vec<_> = config.groups[0].holdings().collect();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].group_id, "g1");
        assert_eq!(holdings[0].quantity, 10.5);
        assert!(holdings[0].earnings.is_none());
    }

    #[test]
    fn test_debug_output_redacts_api_key() {
        let mut config = AppConfig::default();
        config.server.api_key = Some("hunter2-secret".into());

        let rendered = format!("{config:#?}");
        assert!(!rendered.contains("hunter2-secret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("0.0.0.0:8080"));

        config.server.api_key = None;
        assert!(format!("{config:?}").contains("api_key: None"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.schedule.cron, DEFAULT_CRON);
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert!(config.require_api_key().is_err());
        assert_eq!(config.providers.crypto.cache_ttl(), Duration::from_secs(180));
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("SNAPSHOT_SERVICE_API_KEY", "from-env"),
            ("SCRAPING_CRON_SCHEDULE", "*/5 * * * *"),
            ("LISTEN_ADDR", ""),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.require_api_key().unwrap(), "from-env");
        assert_eq!(config.schedule.cron, "*/5 * * * *");
        // Blank values are ignored
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("UTC").unwrap(), FixedOffset::east_opt(0).unwrap());
        assert_eq!(
            parse_offset("+05:30").unwrap(),
            FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
        );
        assert!(parse_offset("America/Buenos_Aires").is_err());
    }
}
