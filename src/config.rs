use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::foreground::ForegroundSourceKind;
use crate::notification::NotificationConfig;

pub static CONFIG_PATH: &str = "/data/media/0/app_lock_config.json";
pub const CONFIG_PATH_ENV: &str = "APP_LOCK_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    // e.g. https://<project>-default-rtdb.firebaseio.com
    pub database_url: String,
    pub collection: String,
    // database secret or id token, sent as ?auth=
    pub auth: Option<String>,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            collection: "childApps".to_string(),
            auth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_ms: u64,
    // trailing window handed to the usage stats query
    pub usage_window_secs: u64,
    pub foreground_source: ForegroundSourceKind,

    pub locked_packages_uri: String,
    pub locked_package_column: String,
    pub lock_activity: String,

    pub notification: NotificationConfig,
    pub firebase: FirebaseConfig,

    pub pid_file: String,
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            usage_window_secs: 1000,
            foreground_source: ForegroundSourceKind::UsageStats,
            locked_packages_uri: "content://com.app.lockcomposeAdmin.provider/apps".to_string(),
            locked_package_column: "package_name".to_string(),
            lock_activity: "com.app.lockcomposeLock/.LockScreenActivity".to_string(),
            notification: NotificationConfig::default(),
            firebase: FirebaseConfig::default(),
            pid_file: "/data/local/tmp/app_lock.pid".to_string(),
            log_file: Some("/data/local/tmp/app_lock.log".to_string()),
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_PATH))
    }

    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_json5::from_str(config_str.as_str())
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Reads the config, writing the defaults first if the file doesn't exist.
    /// A file that exists but doesn't parse is left untouched.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Config> {
        if path.exists() {
            return Self::read(path);
        }

        let config = Config::default();
        let config_str = serde_json::to_string_pretty(&config)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, config_str)
            .with_context(|| format!("failed to write default config to {}", path.display()))?;
        Ok(config)
    }
}
