//! CAN Session CLI Application
//!
//! Bridges the vehicle's MQTT status topic to the session engine:
//! - Subscribes to the gateway's telemetry frames
//! - Runs the session engine (watchdog, change log, alerts)
//! - Announces session start/end and alerts on Discord
//! - Leaves one trace file per session in the output directory

use anyhow::{Context, Result};
use can_session_engine::{LogNotifier, Notifier, SessionEngine};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

mod config;
mod discord;
mod mqtt;

/// Frames buffered between the MQTT subscriber and the engine
const FRAME_QUEUE: usize = 256;

/// CAN Session CLI - Record driving sessions from CAN telemetry
#[derive(Parser, Debug)]
#[command(name = "can-session-cli")]
#[command(about = "Record CAN telemetry sessions from MQTT into trace logs", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides config)
    #[arg(long, value_name = "HOST")]
    broker: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Status topic to subscribe to (overrides config)
    #[arg(long, value_name = "TOPIC")]
    topic: Option<String>,

    /// Directory for trace files (overrides config)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Log notifications instead of posting them to Discord
    #[arg(long)]
    dry_run: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut config::AppConfig) {
        if let Some(host) = &self.broker {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.port {
            config.mqtt.port = port;
        }
        if let Some(topic) = &self.topic {
            config.mqtt.topic = topic.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.engine.output_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Session CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using engine library v{}", can_session_engine::VERSION);

    let mut config = config::load_config(args.config.as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    args.apply_overrides(&mut config);

    log::info!(
        "MQTT: {}:{} topic {}",
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.topic
    );
    log::info!("Trace output: {:?}", config.engine.output_dir);

    let notifier: Arc<dyn Notifier> = if args.dry_run {
        log::info!("Dry run: notifications are only logged");
        Arc::new(LogNotifier)
    } else {
        let settings = config.discord.settings()?;
        Arc::new(discord::DiscordNotifier::new(settings).context("Failed to create Discord client")?)
    };

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
    let engine = SessionEngine::new(&config.engine, notifier);
    let engine_task = tokio::spawn(engine.run(frame_rx));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let subscriber = mqtt::MqttSubscriber::new(&config.mqtt);
    let mqtt_task = tokio::spawn(subscriber.run(frame_tx, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log::info!("Shutting down");

    // Stopping the subscriber closes the frame channel, which lets the engine
    // finalize any active session.
    let _ = shutdown_tx.send(());
    mqtt_task.await.context("MQTT task failed")?;
    let manager = engine_task.await.context("Session engine task failed")?;

    for session in manager.retained_exports() {
        log::error!(
            "Trace for session {} - {} ({} changes) was never written",
            session.started_at,
            session.ended_at,
            session.change_log.len()
        );
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "can-session-cli",
            "--broker",
            "broker.local",
            "--topic",
            "CAR/status",
            "-o",
            "/tmp/traces",
            "--dry-run",
        ]);
        assert!(args.dry_run);

        let mut config = config::AppConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic, "CAR/status");
        assert_eq!(config.engine.output_dir, PathBuf::from("/tmp/traces"));
    }
}
