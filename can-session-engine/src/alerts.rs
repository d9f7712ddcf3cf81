//! Alert rules
//!
//! Rules are pure predicates over a single reading. Whether a rule may still
//! fire is tracked per session in [`AlertFlags`], owned by the session
//! manager, so each rule raises at most one alert per session.

use crate::config::{AlertsConfig, ThresholdRuleConfig};
use crate::types::Reading;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// CAN id carrying the LV battery voltage (mV, u16 little-endian in bytes 0..2)
pub const LOW_VOLTAGE_CAN_ID: u16 = 0x185;

/// LV battery alert threshold in volts
pub const LOW_VOLTAGE_THRESHOLD: f64 = 12.8;

/// Name of the built-in LV battery rule
pub const LOW_VOLTAGE_RULE: &str = "low_voltage";

/// An alert raised by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Name of the rule that fired
    pub rule: String,
    /// Text for humans
    pub message: String,
    /// Physical value that triggered the rule
    pub value: f64,
    /// Whether the alert should escalate to the alert role
    pub urgent: bool,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A stateless check over one reading
pub trait AlertRule: Send + Sync {
    /// Unique name, used as the key of the per-session fired flag
    fn name(&self) -> &str;

    /// Return an alert if the reading violates the rule
    fn evaluate(&self, reading: &Reading) -> Option<Alert>;
}

/// Direction of a threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Below,
    Above,
}

impl Comparison {
    fn violated(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Below => value < threshold,
            Comparison::Above => value > threshold,
        }
    }
}

/// Fires when a scaled u16 field crosses a threshold
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    config: ThresholdRuleConfig,
}

impl ThresholdRule {
    pub fn new(config: ThresholdRuleConfig) -> Self {
        Self { config }
    }

    /// LV battery: id 0x185, millivolts in bytes 0..2, below 12.8V
    pub fn low_voltage() -> Self {
        Self::new(ThresholdRuleConfig {
            name: LOW_VOLTAGE_RULE.to_string(),
            can_id: LOW_VOLTAGE_CAN_ID,
            byte_offset: 0,
            divisor: 1000.0,
            comparison: Comparison::Below,
            threshold: LOW_VOLTAGE_THRESHOLD,
            label: "LV battery is low!!".to_string(),
            unit: "V".to_string(),
            urgent: true,
        })
    }

    /// Physical value of the watched field, if the reading carries it
    pub fn value(&self, reading: &Reading) -> Option<f64> {
        if reading.id != self.config.can_id {
            return None;
        }
        let raw = reading.u16_le(self.config.byte_offset)?;
        Some(f64::from(raw) / self.config.divisor)
    }
}

impl AlertRule for ThresholdRule {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn evaluate(&self, reading: &Reading) -> Option<Alert> {
        let value = self.value(reading)?;
        if !self.config.comparison.violated(value, self.config.threshold) {
            return None;
        }

        Some(Alert {
            rule: self.config.name.clone(),
            message: format!(
                "{} (Measured {} {}{}).",
                self.config.label,
                measured_word(&self.config.unit),
                value,
                self.config.unit
            ),
            value,
            urgent: self.config.urgent,
        })
    }
}

fn measured_word(unit: &str) -> &'static str {
    match unit {
        "V" => "voltage",
        _ => "value",
    }
}

/// Per-session record of which rules already fired
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFlags {
    fired: HashSet<String>,
}

impl AlertFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self, rule: &str) -> bool {
        self.fired.contains(rule)
    }

    pub fn set(&mut self, rule: &str) {
        self.fired.insert(rule.to_string());
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }
}

/// The set of rules evaluated against every reading of a valid frame
#[derive(Default)]
pub struct AlertRegistry {
    rules: Vec<Box<dyn AlertRule>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry described by the configuration
    pub fn from_config(config: &AlertsConfig) -> Self {
        let mut registry = Self::new();
        if config.low_voltage {
            registry.register(ThresholdRule::low_voltage());
        }
        for rule in &config.thresholds {
            registry.register(ThresholdRule::new(rule.clone()));
        }
        registry
    }

    /// Add a rule; returns false (and keeps the existing rule) if the name is taken
    pub fn register(&mut self, rule: impl AlertRule + 'static) -> bool {
        if self.contains(rule.name()) {
            log::warn!(
                "Alert rule {} is already registered, ignoring duplicate",
                rule.name()
            );
            return false;
        }
        log::debug!("Registered alert rule: {}", rule.name());
        self.rules.push(Box::new(rule));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.name() == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule over every reading, skipping rules that already fired
    pub fn evaluate(&self, readings: &[Reading], flags: &mut AlertFlags) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for reading in readings {
            for rule in &self.rules {
                if flags.has_fired(rule.name()) {
                    continue;
                }
                if let Some(alert) = rule.evaluate(reading) {
                    log::warn!("Alert {}: {}", alert.rule, alert.message);
                    flags.set(rule.name());
                    alerts.push(alert);
                }
            }
        }
        alerts
    }
}
