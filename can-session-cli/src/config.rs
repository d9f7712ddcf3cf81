//! Configuration loading and parsing
//!
//! `config.toml` holds the broker, the Discord channel ids and the engine
//! settings. Secrets and channel ids may also come from the environment
//! (`BOT_TOKEN`, `ALERT_CHANNEL`, `LOG_CHANNEL`, `ALERT_ROLE_ID`), which wins
//! over the file.

use anyhow::{Context, Result};
use can_session_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Topic the gateway publishes status frames on
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Pause before polling again after a connection error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_topic() -> String {
    "ART/status".to_string()
}

fn default_client_id() -> String {
    "can-session-cli".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    4000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            topic: default_topic(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    /// Channel for session start and alerts
    pub alert_channel: Option<String>,
    /// Channel for finished session logs
    pub log_channel: Option<String>,
    /// Role mentioned on urgent notifications
    pub alert_role_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            alert_channel: None,
            log_channel: None,
            alert_role_id: None,
            api_base: default_api_base(),
        }
    }
}

/// Discord settings with every required field present
#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub alert_channel: String,
    pub log_channel: String,
    pub alert_role_id: Option<String>,
    pub api_base: String,
}

impl DiscordConfig {
    /// Check that the token and both channels are configured
    pub fn settings(&self) -> Result<DiscordSettings> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Discord {} is not configured (config file or environment)", name))
        };

        Ok(DiscordSettings {
            bot_token: required(&self.bot_token, "bot token")?,
            alert_channel: required(&self.alert_channel, "alert channel")?,
            log_channel: required(&self.log_channel, "log channel")?,
            alert_role_id: self.alert_role_id.clone().filter(|v| !v.trim().is_empty()),
            api_base: self.api_base.trim_end_matches('/').to_string(),
        })
    }
}

impl AppConfig {
    /// Override Discord settings from environment-style variables
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let discord = &mut self.discord;
        for (key, slot) in [
            ("BOT_TOKEN", &mut discord.bot_token),
            ("ALERT_CHANNEL", &mut discord.alert_channel),
            ("LOG_CHANNEL", &mut discord.log_channel),
            ("ALERT_ROLE_ID", &mut discord.alert_role_id),
        ] {
            if let Some(value) = lookup(key) {
                log::debug!("Using {} from environment", key);
                *slot = Some(value);
            }
        }
    }
}

/// Load configuration from a TOML file, or defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        log::info!("No config file given, using defaults");
        return Ok(AppConfig::default());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .engine
        .validate()
        .with_context(|| format!("Invalid engine settings in {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_session_engine::Comparison;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [mqtt]
            host = "telemetry.example.org"
            topic = "ART/status"
            username = "bot"
            password = "secret"

            [discord]
            alert_channel = "111"
            log_channel = "222"

            [engine]
            watchdog_timeout_ms = 5000
            output_dir = "logs"

            [engine.trace]
            title = "TEST CAR Log"

            [[engine.alerts.thresholds]]
            name = "coolant_hot"
            can_id = 0x200
            comparison = "above"
            threshold = 95.0
            divisor = 10.0
            label = "Coolant temperature high"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.host, "telemetry.example.org");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("bot"));
        assert_eq!(config.engine.watchdog_timeout(), Duration::from_secs(5));
        assert_eq!(config.engine.trace.title, "TEST CAR Log");
        assert_eq!(config.engine.trace.channel, 1);
        assert!(config.engine.alerts.low_voltage);

        let rule = &config.engine.alerts.thresholds[0];
        assert_eq!(rule.can_id, 0x200);
        assert_eq!(rule.comparison, Comparison::Above);
        assert!(rule.urgent);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.mqtt.topic, "ART/status");
        assert_eq!(config.engine.watchdog_timeout_ms, 10_000);
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
    }

    #[test]
    fn test_env_overrides_and_settings() {
        let mut config = AppConfig::default();
        assert!(config.discord.settings().is_err());

        let env: HashMap<&str, &str> = [
            ("BOT_TOKEN", "token"),
            ("ALERT_CHANNEL", "111"),
            ("LOG_CHANNEL", "222"),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        let settings = config.discord.settings().unwrap();
        assert_eq!(settings.bot_token, "token");
        assert_eq!(settings.log_channel, "222");
        assert!(settings.alert_role_id.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\nport = 8883").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.mqtt.port, 8883);

        assert!(load_config(Some(Path::new("missing-config.toml"))).is_err());
        assert_eq!(load_config(None).unwrap().mqtt.port, 1883);
    }

    #[test]
    fn test_load_config_rejects_bad_engine_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nwatchdog_timeout_ms = 0").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("watchdog_timeout_ms"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[engine.alerts.thresholds]]\nname = \"low_voltage\"\ncan_id = 0x185\ncomparison = \"below\"\nthreshold = 11.0\nlabel = \"Shadow\""
        )
        .unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate alert rule name"));
    }
}
