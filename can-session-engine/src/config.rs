//! Engine configuration types
//!
//! Everything the session engine needs to know at startup. Transport and
//! notification settings live in the application layer.

use crate::alerts::{Comparison, LOW_VOLTAGE_RULE};
use crate::types::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Silence after the last valid frame before a session is considered over
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 10_000;

/// Shortest accepted watchdog window
pub const MIN_WATCHDOG_TIMEOUT_MS: u64 = 100;

/// Configuration for the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Watchdog window in milliseconds (default: 10000ms)
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_ms: u64,

    /// Directory that receives one trace file per session
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// How many failed exports to keep in memory for retry (default: 8)
    #[serde(default = "default_max_retained_exports")]
    pub max_retained_exports: usize,

    #[serde(default)]
    pub trace: TraceConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,
}

fn default_watchdog_timeout() -> u64 {
    DEFAULT_WATCHDOG_TIMEOUT_MS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("art_logs")
}

fn default_max_retained_exports() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_ms: default_watchdog_timeout(),
            output_dir: default_output_dir(),
            max_retained_exports: default_max_retained_exports(),
            trace: TraceConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

/// Trace file header settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Title printed at the top of every trace file
    #[serde(default = "default_title")]
    pub title: String,

    /// CAN channel reported in the header and on every line
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_title() -> String {
    "ARUS ART TELEMETRY Log".to_string()
}

fn default_channel() -> u8 {
    1
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            channel: default_channel(),
        }
    }
}

/// Alert rule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Enable the built-in LV battery rule (id 0x185 below 12.8V)
    #[serde(default = "default_true")]
    pub low_voltage: bool,

    /// Extra threshold rules
    #[serde(default)]
    pub thresholds: Vec<ThresholdRuleConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            low_voltage: true,
            thresholds: Vec::new(),
        }
    }
}

/// A threshold rule over a little-endian u16 inside one reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRuleConfig {
    /// Unique rule name; also the key of the per-session fired flag
    pub name: String,
    /// CAN id the rule watches
    pub can_id: u16,
    /// Offset of the u16 within the data bytes
    #[serde(default)]
    pub byte_offset: usize,
    /// Raw value is divided by this to get the physical value
    #[serde(default = "default_divisor")]
    pub divisor: f64,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Human readable text used in the alert message
    pub label: String,
    #[serde(default)]
    pub unit: String,
    /// Mention the alert role when firing
    #[serde(default = "default_true")]
    pub urgent: bool,
}

fn default_divisor() -> f64 {
    1.0
}

impl EngineConfig {
    /// Create a new engine configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the watchdog window
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set the trace output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method: enable or disable the LV battery rule
    pub fn with_low_voltage_alert(mut self, enabled: bool) -> Self {
        self.alerts.low_voltage = enabled;
        self
    }

    /// Builder method: add a threshold rule
    pub fn add_threshold_rule(mut self, rule: ThresholdRuleConfig) -> Self {
        self.alerts.thresholds.push(rule);
        self
    }

    /// Builder method: set how many failed exports are retained
    pub fn with_max_retained_exports(mut self, max: usize) -> Self {
        self.max_retained_exports = max;
        self
    }

    /// Watchdog window as a Duration
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.watchdog_timeout_ms < MIN_WATCHDOG_TIMEOUT_MS {
            return Err(EngineError::InvalidConfig(format!(
                "watchdog_timeout_ms must be at least {} (got {})",
                MIN_WATCHDOG_TIMEOUT_MS, self.watchdog_timeout_ms
            )));
        }

        let mut names = HashSet::new();
        if self.alerts.low_voltage {
            names.insert(LOW_VOLTAGE_RULE);
        }
        for rule in &self.alerts.thresholds {
            if !names.insert(rule.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate alert rule name: {}",
                    rule.name
                )));
            }
        }

        Ok(())
    }
}
