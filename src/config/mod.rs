//! # Configuration
//!
//! TOML configuration for the tool. Every section has defaults, so a missing
//! file section (or a missing file, for commands that tolerate it) still yields
//! a usable setup. CLI flags override what is loaded here.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//! read_timeout_ms = 50
//! presence_check = true
//!
//! [session]
//! enable_debug_trace = false
//! reconnect_interval_ms = 1
//! reboot_settle_ms = 1000
//! disappear_timeout_ms = 5000
//!
//! [rx]
//! key_timeout_ms = 100
//! decay_interval_ms = 10
//! send_interval_ms = 10
//!
//! [flash]
//! source_dir = "."
//! build_command = ["make", "binary"]
//! dfu_util = "dfu-util"
//! dfu_timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rx: RxConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Serial read timeout; bounds how long a writer can wait behind the read loop.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Only attempt to reopen the port once its device node exists again. Opening
    /// a missing node on macOS resets the whole USB hub. Off on Windows, where
    /// COM ports have no device file.
    #[serde(default = "default_presence_check")]
    pub presence_check: bool,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_read_timeout_ms() -> u64 {
    50
}

fn default_presence_check() -> bool {
    !cfg!(windows)
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            presence_check: default_presence_check(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Turn on FEATURE_DEBUG_TRACE and route it to the first MSP port (INAV 1.9+).
    #[serde(default)]
    pub enable_debug_trace: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_reboot_settle_ms")]
    pub reboot_settle_ms: u64,
    #[serde(default = "default_disappear_timeout_ms")]
    pub disappear_timeout_ms: u64,
}

fn default_reconnect_interval_ms() -> u64 {
    1
}

fn default_reboot_settle_ms() -> u64 {
    1000
}

fn default_disappear_timeout_ms() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enable_debug_trace: false,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reboot_settle_ms: default_reboot_settle_ms(),
            disappear_timeout_ms: default_disappear_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxConfig {
    #[serde(default = "default_key_timeout_ms")]
    pub key_timeout_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub decay_interval_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub send_interval_ms: u64,
}

fn default_key_timeout_ms() -> u64 {
    100
}

fn default_tick_ms() -> u64 {
    10
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            key_timeout_ms: default_key_timeout_ms(),
            decay_interval_ms: default_tick_ms(),
            send_interval_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: String,
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
    #[serde(default = "default_dfu_util")]
    pub dfu_util: String,
    #[serde(default = "default_dfu_timeout_secs")]
    pub dfu_timeout_secs: u64,
}

fn default_source_dir() -> String {
    ".".to_string()
}

fn default_build_command() -> Vec<String> {
    vec!["make".to_string(), "binary".to_string()]
}

fn default_dfu_util() -> String {
    "dfu-util".to_string()
}

fn default_dfu_timeout_secs() -> u64 {
    30
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            build_command: default_build_command(),
            dfu_util: default_dfu_util(),
            dfu_timeout_secs: default_dfu_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed level; unknown names fall back to `info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        if config.flash.build_command.is_empty() {
            return Err(anyhow!("{}: [flash] build_command must not be empty", path));
        }

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
