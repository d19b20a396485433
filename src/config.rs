//! Configuration loading and types for voxtype-relay
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxtype/relay.toml)
//! 3. Environment variables (VOXTYPE_RELAY_*)
//! 4. CLI arguments (highest priority)
//!
//! The relay only reads configuration. It never writes the file.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxtype Relay Configuration
#
# Location: ~/.config/voxtype/relay.toml
# All settings are optional; missing values use the defaults shown here.

[daemon]
# voxtype binary used for the status stream and control commands.
# A bare name is looked up on PATH.
binary = "voxtype"

# Request model/device/backend details in status records
extended = false

[relay]
# Delay before relaunching the status stream after it ends (50-60000)
restart_delay_ms = 2000

# Events buffered per consumer; the oldest is dropped when full (1-1024)
channel_capacity = 8

[ui]
# How often the overlay checks for new status (10-1000)
poll_interval_ms = 50

# Show the status overlay line on the terminal
overlay = true

[instance]
# Registration name; the socket lives at $XDG_RUNTIME_DIR/voxtype/<name>.sock
name = "io.github.voxtype.Relay"

# How long to wait for a running instance to answer before taking over (50-10000)
probe_timeout_ms = 500

[notification]
# Notify when recording starts
on_recording_start = false

# Notify when recording stops (transcription beginning)
on_recording_stop = false

# Notify when the daemon stops responding
on_daemon_stopped = true

[update]
# Check GitHub for new voxtype releases
check_enabled = true

# Hours between checks (1-720)
interval_hours = 24
"#;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub relay: RelayConfig,
    pub ui: UiConfig,
    pub instance: InstanceConfig,
    pub notification: NotificationConfig,
    pub update: UpdateConfig,
}

/// The voxtype daemon binary
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path or bare name resolved on PATH
    pub binary: String,

    /// Pass `--extended` to the status stream
    pub extended: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: "voxtype".to_string(),
            extended: false,
        }
    }
}

/// Status relay tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub restart_delay_ms: u64,
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 2000,
            channel_capacity: 8,
        }
    }
}

impl RelayConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// UI loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UiConfig {
    pub poll_interval_ms: u64,
    pub overlay: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            overlay: true,
        }
    }
}

impl UiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Single-instance registration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub probe_timeout_ms: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "io.github.voxtype.Relay".to_string(),
            probe_timeout_ms: 500,
        }
    }
}

impl InstanceConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Desktop notifications on state transitions
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notify when recording starts
    pub on_recording_start: bool,

    /// Notify when recording stops (transcription starting)
    pub on_recording_stop: bool,

    /// Notify when the status stream reports the daemon as stopped
    pub on_daemon_stopped: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            on_recording_start: false,
            on_recording_stop: false,
            on_daemon_stopped: true,
        }
    }
}

/// Periodic update check
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub check_enabled: bool,
    pub interval_hours: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_enabled: true,
            interval_hours: 24,
        }
    }
}

impl UpdateConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxtype")
            .map(|dirs| dirs.config_dir().join("relay.toml"))
    }

    /// Get the runtime directory for ephemeral files (sockets, locks)
    pub fn runtime_dir() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, otherwise fall back to /tmp
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("voxtype")
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<(), RelayError> {
        fn check<T: PartialOrd + std::fmt::Display>(
            key: &str,
            value: T,
            min: T,
            max: T,
        ) -> Result<(), RelayError> {
            if value < min || value > max {
                return Err(RelayError::Config(format!(
                    "{} = {} is out of range ({}..={})",
                    key, value, min, max
                )));
            }
            Ok(())
        }

        if self.daemon.binary.trim().is_empty() {
            return Err(RelayError::Config("daemon.binary must not be empty".into()));
        }
        check("relay.restart_delay_ms", self.relay.restart_delay_ms, 50, 60_000)?;
        check("relay.channel_capacity", self.relay.channel_capacity, 1, 1024)?;
        check("ui.poll_interval_ms", self.ui.poll_interval_ms, 10, 1000)?;
        check("instance.probe_timeout_ms", self.instance.probe_timeout_ms, 50, 10_000)?;
        check("update.interval_hours", self.update.interval_hours, 1, 720)?;

        let name = &self.instance.name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(RelayError::Config(format!(
                "instance.name '{}' may only contain letters, digits, '.', '_' and '-'",
                name
            )));
        }

        Ok(())
    }

    /// Apply VOXTYPE_RELAY_* overrides from a variable lookup
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, RelayError> {
            value
                .trim()
                .parse()
                .map_err(|_| RelayError::Config(format!("{} must be a number, got '{}'", name, value)))
        }

        if let Some(binary) = var("VOXTYPE_RELAY_BINARY") {
            self.daemon.binary = binary;
        }
        if let Some(delay) = var("VOXTYPE_RELAY_RESTART_DELAY_MS") {
            self.relay.restart_delay_ms = number("VOXTYPE_RELAY_RESTART_DELAY_MS", &delay)?;
        }
        if let Some(capacity) = var("VOXTYPE_RELAY_CHANNEL_CAPACITY") {
            self.relay.channel_capacity = number("VOXTYPE_RELAY_CHANNEL_CAPACITY", &capacity)?;
        }
        Ok(())
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, RelayError> {
    // Start with defaults
    let mut config = Config::default();

    // Determine config file path
    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    // Load from file if it exists
    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| RelayError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| RelayError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    config.apply_env(|name| std::env::var(name).ok())?;

    Ok(config)
}
