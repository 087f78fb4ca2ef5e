//! Application-level configuration loading: storage backend, queue rules, advisory client and
//! seed branches.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::dao::{models::Branch, transaction::RetryPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MAIQUEUE_CONFIG_PATH";
const DEFAULT_ADVISORY_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";

/// Which [`EntityStore`](crate::dao::entity_store::EntityStore) backend the server runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile in-process store seeded from the configured branches.
    #[default]
    Memory,
    /// MongoDB replica set, available with the `mongo-store` feature.
    Mongo,
}

/// Business rules of the admission engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRules {
    /// Playing sessions older than this are finished by the watchdog.
    pub game_time_limit: Duration,
    /// Period between two watchdog sweeps.
    pub watchdog_interval: Duration,
    /// Maximum number of waiting guests a single host may own.
    pub guest_limit: usize,
    /// Branch assigned to freshly registered identities.
    pub default_branch: String,
    /// Retry policy of optimistic transactions.
    pub retry: RetryPolicy,
}

impl Default for QueueRules {
    fn default() -> Self {
        Self {
            game_time_limit: Duration::from_secs(20 * 60),
            watchdog_interval: Duration::from_secs(60),
            guest_limit: 2,
            default_branch: "sisa".into(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Where and how patiently the wait/partner advisory service is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorySettings {
    /// Base URL the advisory endpoints are resolved against.
    pub base_url: String,
    /// Per-request timeout before the fallback answer is served.
    pub timeout: Duration,
}

impl Default for AdvisorySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ADVISORY_URL.into(),
            timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Selected storage backend.
    pub storage: StorageBackend,
    /// Connection string of the Mongo backend.
    pub mongo_uri: String,
    /// Database name override; the backend default is used when unset.
    pub mongo_db: Option<String>,
    /// Advisory service settings.
    pub advisory: AdvisorySettings,
    /// Admission engine rules.
    pub rules: QueueRules,
    /// Branch table of the memory backend; inserted when missing on the Mongo backend.
    pub branches: Vec<Branch>,
}

impl AppConfig {
    /// Load the configuration from disk and the environment, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        storage = ?app_config.storage,
                        branches = app_config.branches.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides(|name| env::var(name).ok())
    }

    /// Apply `MONGO_URI`, `MONGO_DB` and `ADVISORY_URL` on top of the file configuration.
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());
        if let Some(uri) = lookup("MONGO_URI") {
            self.mongo_uri = uri;
        }
        if let Some(db) = lookup("MONGO_DB") {
            self.mongo_db = Some(db);
        }
        if let Some(url) = lookup("ADVISORY_URL") {
            self.advisory.base_url = url;
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            mongo_uri: DEFAULT_MONGO_URI.into(),
            mongo_db: None,
            advisory: AdvisorySettings::default(),
            rules: QueueRules::default(),
            branches: default_branches(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    storage: StorageBackend,
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
    advisory_url: Option<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    advisory_timeout_ms: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    game_time_limit_secs: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    watchdog_interval_secs: Duration,
    guest_limit: usize,
    default_branch: Option<String>,
    retry_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    retry_base_delay_ms: Duration,
    branches: Option<Vec<RawBranch>>,
}

impl Default for RawConfig {
    fn default() -> Self {
        let rules = QueueRules::default();
        Self {
            storage: StorageBackend::default(),
            mongo_uri: None,
            mongo_db: None,
            advisory_url: None,
            advisory_timeout_ms: AdvisorySettings::default().timeout,
            game_time_limit_secs: rules.game_time_limit,
            watchdog_interval_secs: rules.watchdog_interval,
            guest_limit: rules.guest_limit,
            default_branch: None,
            retry_attempts: rules.retry.attempts,
            retry_base_delay_ms: rules.retry.base_delay,
            branches: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            storage: value.storage,
            mongo_uri: value.mongo_uri.unwrap_or(defaults.mongo_uri),
            mongo_db: value.mongo_db,
            advisory: AdvisorySettings {
                base_url: value.advisory_url.unwrap_or(defaults.advisory.base_url),
                timeout: value.advisory_timeout_ms,
            },
            rules: QueueRules {
                game_time_limit: value.game_time_limit_secs,
                watchdog_interval: value.watchdog_interval_secs,
                guest_limit: value.guest_limit,
                default_branch: value
                    .default_branch
                    .unwrap_or(defaults.rules.default_branch),
                retry: RetryPolicy {
                    attempts: value.retry_attempts.max(1),
                    base_delay: value.retry_base_delay_ms,
                    ..defaults.rules.retry
                },
            },
            branches: value
                .branches
                .map(|branches| branches.into_iter().map(Into::into).collect())
                .unwrap_or(defaults.branches),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of a single branch entry inside the configuration file.
struct RawBranch {
    branch_code: String,
    branch_name: String,
    cabinet_count: Option<u32>,
    #[serde(default = "default_open")]
    open: bool,
}

fn default_open() -> bool {
    true
}

impl From<RawBranch> for Branch {
    fn from(value: RawBranch) -> Self {
        Self {
            branch_id: value.branch_code,
            name: value.branch_name,
            cabinet_count: value.cabinet_count,
            open: value.open,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in branch table shipped with the binary.
fn default_branches() -> Vec<Branch> {
    vec![
        Branch {
            branch_id: "sisa".into(),
            name: "SM Seaside City".into(),
            cabinet_count: Some(1),
            open: true,
        },
        Branch {
            branch_id: "jamal".into(),
            name: "SM Jmall".into(),
            cabinet_count: Some(2),
            open: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "storage": "mongo",
                "guest_limit": 3,
                "game_time_limit_secs": 600,
                "branches": [{ "branchCode": "ayala", "branchName": "Ayala", "cabinetCount": 4 }]
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);

        assert_eq!(config.storage, StorageBackend::Mongo);
        assert_eq!(config.rules.guest_limit, 3);
        assert_eq!(config.rules.game_time_limit, Duration::from_secs(600));
        assert_eq!(config.rules.watchdog_interval, Duration::from_secs(60));
        assert_eq!(config.advisory.timeout, Duration::from_secs(3));
        assert_eq!(config.branches.len(), 1);
        assert!(config.branches[0].open);
        assert_eq!(config.branches[0].capacity(), 4);
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = AppConfig::default().with_env_overrides(|name| match name {
            "MONGO_URI" => Some("mongodb://db:27017".into()),
            "ADVISORY_URL" => Some("http://advisor:5000/api".into()),
            "MONGO_DB" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.mongo_uri, "mongodb://db:27017");
        assert_eq!(config.advisory.base_url, "http://advisor:5000/api");
        assert_eq!(config.mongo_db, None);
    }
}
