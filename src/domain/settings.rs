use crate::domain::connection::RetryPolicy;
use crate::domain::edge::DEFAULT_DEAD_ZONE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Vendor characteristic carrying the controller's input reports
pub const DEFAULT_INPUT_CHAR_UUID: &str = "7492866c-ec3e-4619-8258-32755ffcc0f9";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "switch2_keybridge".to_string()
}
fn default_rotation() -> LogRotation {
    LogRotation::Daily
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Settings
    #[serde(default = "default_input_uuid")]
    pub ble_input_char_uuid: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Matched against the advertised name when no manufacturer data is present
    #[serde(default = "default_device_name_hint")]
    pub device_name_hint: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub notification_queue_capacity: usize,

    // Retry Settings
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    // Input Settings
    /// Fraction of full stick deflection treated as centered
    #[serde(default = "default_dead_zone")]
    pub stick_dead_zone: f32,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_input_char_uuid: default_input_uuid(),
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            device_name_hint: default_device_name_hint(),
            notification_queue_capacity: default_queue_capacity(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            stick_dead_zone: default_dead_zone(),
            debug_raw_data_logging: false,
        }
    }
}

fn default_input_uuid() -> String {
    DEFAULT_INPUT_CHAR_UUID.to_string()
}
fn default_scan_timeout_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    30000
}
fn default_device_name_hint() -> Option<String> {
    Some("Pro Controller".to_string())
}
fn default_queue_capacity() -> usize {
    64
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    8000
}
fn default_dead_zone() -> f32 {
    DEFAULT_DEAD_ZONE
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.stick_dead_zone > 0.0 && self.stick_dead_zone < 1.0) {
            anyhow::bail!(
                "stick_dead_zone must be between 0 and 1 (exclusive), got {}",
                self.stick_dead_zone
            );
        }
        if self.notification_queue_capacity == 0 {
            anyhow::bail!("notification_queue_capacity must be at least 1");
        }
        if self.scan_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            anyhow::bail!("scan and connect timeouts must be non-zero");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            );
        }
        self.input_char_uuid()?;
        Ok(())
    }

    pub fn input_char_uuid(&self) -> anyhow::Result<Uuid> {
        Uuid::parse_str(&self.ble_input_char_uuid).map_err(|e| {
            anyhow::anyhow!(
                "invalid ble_input_char_uuid '{}': {}",
                self.ble_input_char_uuid,
                e
            )
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::default_settings_path()?;
        Self::from_path(settings_path)
    }

    /// Load from an explicit file. A missing file yields defaults; a
    /// present but invalid one is an error.
    pub fn from_path(settings_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = settings_path.into();
        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)?
        } else {
            Settings::default()
        };
        settings.validate()?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    pub fn default_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Switch2KeyBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
