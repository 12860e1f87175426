// Host-side application settings.
//
// Persisted as TOML under the user config dir. Every field has a serde
// default so old settings files keep loading as fields are added.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppSettings {
    #[serde(default)]
    pub default_port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    #[serde(default)]
    pub capture_boot_log: bool,
    #[serde(default = "default_boot_log_window_secs")]
    pub boot_log_window_secs: u64,

    #[serde(default = "default_flash_baud_rate")]
    pub flash_baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_reports_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("wisp-setup")
        .join("reports")
        .to_string_lossy()
        .to_string()
}
fn default_command_timeout_ms() -> u64 {
    5_000
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_backoff_factor() -> f64 {
    2.0
}
fn default_boot_log_window_secs() -> u64 {
    8
}
fn default_flash_baud_rate() -> u32 {
    921_600
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_port: None,
            baud_rate: default_baud_rate(),
            reports_dir: default_reports_dir(),
            command_timeout_ms: default_command_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_backoff_factor: default_retry_backoff_factor(),
            capture_boot_log: false,
            boot_log_window_secs: default_boot_log_window_secs(),
            flash_baud_rate: default_flash_baud_rate(),
        }
    }
}

impl AppSettings {
    pub fn settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("wisp-setup")
            .join("settings.toml")
    }

    /// Load from disk; a missing or unreadable file yields the defaults.
    pub fn load() -> AppSettings {
        let path = Self::settings_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    tlog!("[settings] {} is malformed ({}), using defaults", path.display(), e);
                    AppSettings::default()
                }
            },
            Err(_) => AppSettings::default(),
        }
    }

    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings dir: {}", e))?;
        }
        let text =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to encode settings: {}", e))?;
        std::fs::write(&path, text).map_err(|e| format!("Failed to write settings: {}", e))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            backoff_factor: self.retry_backoff_factor.max(1.0),
            per_attempt_timeout: None,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reports_dir(&self) -> PathBuf {
        PathBuf::from(&self.reports_dir)
    }
}
