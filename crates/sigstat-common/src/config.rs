//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the publisher runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

pub const ENV_KITS_SERVER: &str = "KITS_SERVER";
pub const ENV_KITS_USER: &str = "KITS_USER";
pub const ENV_KITS_PASSWORD: &str = "KITS_PASSWORD";
// Deployed environments carry this spelling.
pub const ENV_KITS_DATABASE: &str = "KITS_DATABSE";
pub const ENV_SOCRATA_APP_TOKEN: &str = "SOCRATA_APP_TOKEN";
pub const ENV_SOCRATA_API_KEY_ID: &str = "SOCRATA_API_KEY_ID";
pub const ENV_SOCRATA_API_KEY_SECRET: &str = "SOCRATA_API_KEY_SECRET";

fn default_kits_port() -> u16 {
    1433
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_trust_server_certificate() -> bool {
    false
}

fn default_socrata_base_url() -> String {
    "https://data.austintexas.gov".to_owned()
}

fn default_status_resource_id() -> String {
    "5zpr-dehc".to_owned()
}

fn default_assets_resource_id() -> String {
    "p53x-x73x".to_owned()
}

fn default_row_limit() -> u32 {
    99_999
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_timezone() -> String {
    "US/Central".to_owned()
}

fn default_flagged_statuses() -> Vec<i32> {
    vec![1, 2, 3]
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for a publisher run.
///
/// Built once at process start. Components receive the section they need by
/// reference and never consult the process environment themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub kits: KitsConfig,
    #[serde(default)]
    pub socrata: SocrataConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "SIGSTAT_CONFIG";

    /// Load configuration from the optional file and the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Load configuration resolving environment keys through `lookup`.
    ///
    /// The file is taken from `explicit`, then from `SIGSTAT_CONFIG`; without
    /// either the built-in defaults apply. Credential variables always win over
    /// file values.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = explicit.map(Path::to_path_buf).or_else(|| {
            lookup(Self::ENV_CONFIG_PATH)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        });

        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn apply_env<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut String); 7] = [
            (ENV_KITS_SERVER, &mut self.kits.server),
            (ENV_KITS_USER, &mut self.kits.user),
            (ENV_KITS_PASSWORD, &mut self.kits.password),
            (ENV_KITS_DATABASE, &mut self.kits.database),
            (ENV_SOCRATA_APP_TOKEN, &mut self.socrata.app_token),
            (ENV_SOCRATA_API_KEY_ID, &mut self.socrata.api_key_id),
            (ENV_SOCRATA_API_KEY_SECRET, &mut self.socrata.api_key_secret),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.kits.validate()?;
        self.socrata.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for the KITS SQL Server database.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KitsConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_kits_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default = "default_trust_server_certificate")]
    pub trust_server_certificate: bool,
}

impl Default for KitsConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_kits_port(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            connect_timeout: default_connect_timeout(),
            trust_server_certificate: default_trust_server_certificate(),
        }
    }
}

impl KitsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(anyhow!("kits server is not set ({})", ENV_KITS_SERVER));
        }
        if self.user.trim().is_empty() {
            return Err(anyhow!("kits user is not set ({})", ENV_KITS_USER));
        }
        if self.database.trim().is_empty() {
            return Err(anyhow!("kits database is not set ({})", ENV_KITS_DATABASE));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("kits connect_timeout must be positive"));
        }
        Ok(())
    }
}

/// Settings for the open data portal datasets and write credentials.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocrataConfig {
    #[serde(default = "default_socrata_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub app_token: String,
    #[serde(default, skip_serializing)]
    pub api_key_id: String,
    #[serde(default, skip_serializing)]
    pub api_key_secret: String,
    #[serde(default = "default_status_resource_id")]
    pub status_resource_id: String,
    #[serde(default = "default_assets_resource_id")]
    pub assets_resource_id: String,
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for SocrataConfig {
    fn default() -> Self {
        Self {
            base_url: default_socrata_base_url(),
            app_token: String::new(),
            api_key_id: String::new(),
            api_key_secret: String::new(),
            status_resource_id: default_status_resource_id(),
            assets_resource_id: default_assets_resource_id(),
            row_limit: default_row_limit(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl SocrataConfig {
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow!(
                "socrata base_url '{}' must be an http(s) URL",
                self.base_url
            ));
        }
        if self.status_resource_id.trim().is_empty() || self.assets_resource_id.trim().is_empty()
        {
            return Err(anyhow!("socrata resource identifiers cannot be empty"));
        }
        if self.row_limit == 0 {
            return Err(anyhow!("socrata row_limit must be positive"));
        }
        Ok(())
    }

    /// Basic-auth pair for writes, when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.api_key_id.is_empty() || self.api_key_secret.is_empty() {
            return None;
        }
        Some((self.api_key_id.as_str(), self.api_key_secret.as_str()))
    }
}

/// Normalisation and selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// IANA zone the KITS timestamps are recorded in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Operation state codes that mark a signal as flashing or offline.
    #[serde(default = "default_flagged_statuses")]
    pub flagged_statuses: Vec<i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            flagged_statuses: default_flagged_statuses(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flagged_statuses.is_empty() {
            return Err(anyhow!("pipeline flagged_statuses cannot be empty"));
        }
        self.tz()?;
        Ok(())
    }

    /// Parse the configured timezone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| anyhow!("unknown timezone '{}': {}", self.timezone, err))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn credentials() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_KITS_SERVER, "kits.example"),
            (ENV_KITS_USER, "reader"),
            (ENV_KITS_PASSWORD, "hunter2"),
            (ENV_KITS_DATABASE, "KITS"),
            (ENV_SOCRATA_APP_TOKEN, "token"),
            (ENV_SOCRATA_API_KEY_ID, "key-id"),
            (ENV_SOCRATA_API_KEY_SECRET, "key-secret"),
        ]
    }

    #[test]
    fn environment_supplies_credentials_over_defaults() {
        let config = AppConfig::load_with(None, env(&credentials())).unwrap();
        assert_eq!(config.kits.server, "kits.example");
        assert_eq!(config.kits.database, "KITS");
        assert_eq!(config.kits.connect_timeout, Duration::from_secs(10));
        assert!(!config.kits.trust_server_certificate);
        assert_eq!(config.socrata.status_resource_id, "5zpr-dehc");
        assert_eq!(config.socrata.assets_resource_id, "p53x-x73x");
        assert_eq!(config.socrata.row_limit, 99_999);
        assert_eq!(config.socrata.credentials(), Some(("key-id", "key-secret")));
        assert_eq!(config.pipeline.flagged_statuses, vec![1, 2, 3]);
        assert_eq!(config.pipeline.tz().unwrap(), chrono_tz::US::Central);
    }

    #[test]
    fn missing_server_is_rejected() {
        let vars: Vec<_> = credentials()
            .into_iter()
            .filter(|(key, _)| *key != ENV_KITS_SERVER)
            .collect();
        let err = AppConfig::load_with(None, env(&vars)).unwrap_err();
        assert!(err.to_string().contains(ENV_KITS_SERVER));
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigstat.toml");
        fs::write(
            &path,
            r#"
[kits]
server = "from-file"
connect_timeout = 3

[socrata]
base_url = "http://127.0.0.1:9000"
row_limit = 10

[pipeline]
timezone = "America/Chicago"
flagged_statuses = [2, 3]
"#,
        )
        .unwrap();

        let mut vars = credentials();
        vars.retain(|(key, _)| *key != ENV_KITS_SERVER);
        let config = AppConfig::load_with(Some(&path), env(&vars)).unwrap();
        assert_eq!(config.kits.server, "from-file");
        assert_eq!(config.kits.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.socrata.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.socrata.row_limit, 10);
        assert_eq!(config.pipeline.flagged_statuses, vec![2, 3]);

        vars.push((ENV_KITS_SERVER, "from-env"));
        let config = AppConfig::load_with(Some(&path), env(&vars)).unwrap();
        assert_eq!(config.kits.server, "from-env");
    }

    #[test]
    fn config_path_can_come_from_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigstat.toml");
        fs::write(&path, "[socrata]\nrow_limit = 5\n").unwrap();

        let path_str = path.display().to_string();
        let mut vars: Vec<(&str, &str)> = credentials();
        vars.push((AppConfig::ENV_CONFIG_PATH, path_str.as_str()));
        let config = AppConfig::load_with(None, env(&vars)).unwrap();
        assert_eq!(config.socrata.row_limit, 5);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let pipeline = PipelineConfig {
            timezone: "Mars/Olympus".into(),
            ..PipelineConfig::default()
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn empty_flagged_statuses_are_rejected() {
        let pipeline = PipelineConfig {
            flagged_statuses: Vec::new(),
            ..PipelineConfig::default()
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn partial_write_credentials_are_ignored() {
        let socrata = SocrataConfig {
            api_key_id: "only-id".into(),
            ..SocrataConfig::default()
        };
        assert_eq!(socrata.credentials(), None);
    }

    #[test]
    fn secrets_are_not_serialised() {
        let config = AppConfig::load_with(None, env(&credentials())).unwrap();
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("key-secret"));
    }
}
