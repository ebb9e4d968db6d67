//! Configuration loading and target definitions
//!
//! Configuration lives in a YAML file (`~/.cfscout/config.yaml` by
//! default). Besides connection settings it carries the list of
//! [`Target`] patterns that drive discovery and the tuning knobs of
//! the cache, fetcher and aggregator layers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_DIR: &str = ".cfscout";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const DEFAULT_PROTOCOL: &str = "https";
const DEFAULT_PATH: &str = "/metrics";

/// One configured discovery pattern.
///
/// Each of the three levels (organization, space, application) accepts
/// either a literal name or a regex, never both; with neither set the
/// level matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub org_name: Option<String>,
    pub org_regex: Option<String>,
    pub space_name: Option<String>,
    pub space_regex: Option<String>,
    pub application_name: Option<String>,
    pub application_regex: Option<String>,

    /// Scrape protocol, `http` or `https`. Defaults to `https`.
    pub protocol: Option<String>,

    /// Scrape path. Defaults to `/metrics`.
    pub path: Option<String>,

    /// Regexes selecting which of an application's routes to scrape.
    /// The first pattern with any matching route wins.
    pub preferred_route_regex: Vec<String>,

    /// Port for internally-routed applications. Falls back to the
    /// globally configured default when unset.
    pub internal_route_port: Option<u16>,

    /// Enable kubernetes-style annotation refinement
    /// (`prometheus.io/scrape` opt-in, `prometheus.io/path` override).
    pub kubernetes_annotations: bool,
}

impl Target {
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
    }

    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_PATH)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(protocol) = &self.protocol {
            if protocol != "http" && protocol != "https" {
                return Err(ConfigError::Invalid(format!(
                    "invalid target protocol '{protocol}': must be 'http' or 'https'"
                )));
            }
        }

        let levels = [
            ("org", &self.org_name, &self.org_regex),
            ("space", &self.space_name, &self.space_regex),
            ("application", &self.application_name, &self.application_regex),
        ];
        for (level, name, regex) in levels {
            if name.is_some() && regex.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "target sets both {level} name and {level} regex; use at most one"
                )));
            }
        }

        Ok(())
    }

    /// Compile the preferred-route patterns, dropping invalid ones with
    /// a warning so one bad pattern does not disable the rest.
    pub fn compiled_preferred_route_regexes(&self) -> Vec<Regex> {
        self.preferred_route_regex
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!("ignoring invalid preferred route regex '{pattern}': {err}");
                    None
                }
            })
            .collect()
    }
}

/// Compile a target-level name pattern, matching case-insensitively
/// against the full entity name.
pub fn compile_name_regex(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|err| ConfigError::Invalid(format!("invalid regex '{pattern}': {err}")))
}

/// Expiry/refresh windows of one cache category, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWindow {
    pub expire_after_access_secs: u64,
    pub refresh_after_write_secs: u64,
}

impl CacheWindow {
    pub const fn new(expire_after_access_secs: u64, refresh_after_write_secs: u64) -> Self {
        Self {
            expire_after_access_secs,
            refresh_after_write_secs,
        }
    }

    pub fn expire_after_access(&self) -> Duration {
        Duration::from_secs(self.expire_after_access_secs)
    }

    pub fn refresh_after_write(&self) -> Duration {
        Duration::from_secs(self.refresh_after_write_secs)
    }
}

/// Per-category cache windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub org: CacheWindow,
    pub space: CacheWindow,
    pub application: CacheWindow,
    pub domain: CacheWindow,
    pub maintenance_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            org: CacheWindow::new(3600, 3600),
            space: CacheWindow::new(3600, 3600),
            application: CacheWindow::new(300, 300),
            domain: CacheWindow::new(3600, 3600),
            maintenance_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Tuning of the request fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub request_timeout_ms: u64,
    pub backoff_base_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2500,
            backoff_base_ms: 500,
        }
    }
}

impl FetcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Tuning of the request aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub check_interval_ms: u64,
    pub max_block_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 250,
            max_block_size: 100,
        }
    }
}

impl AggregatorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Connection settings of the upstream control-plane API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_url: String,
    pub api_token: Option<String>,
}

/// Full application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,

    /// Upstream calls per second; a value of zero or below disables
    /// rate limiting.
    pub rate_limit_per_second: f64,

    pub cache: CacheConfig,
    pub fetcher: FetcherConfig,
    pub aggregator: AggregatorConfig,

    /// Port used for internally-routed targets that set none.
    pub default_internal_route_port: u16,

    pub targets: Vec<Target>,
}

impl Config {
    /// Default config file location: `~/.cfscout/config.yaml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NotFound)?;
        Ok(home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound);
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SaveError(e.to_string()))?;
        }
        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::SaveError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_internal_route_port == 0 {
            return Err(ConfigError::Invalid(
                "default_internal_route_port must not be 0".to_string(),
            ));
        }
        for target in &self.targets {
            target.validate()?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            rate_limit_per_second: 0.0,
            cache: CacheConfig::default(),
            fetcher: FetcherConfig::default(),
            aggregator: AggregatorConfig::default(),
            default_internal_route_port: 8080,
            targets: Vec::new(),
        }
    }
}
