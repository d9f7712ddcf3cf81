//! CAN Session Engine Library
//!
//! Turns a stream of binary telemetry frames from a vehicle CAN gateway into
//! driving sessions, one trace file per session, and threshold alerts.
//!
//! # Architecture
//!
//! Each frame flows through:
//! - [`FrameDecoder`] - parses the timestamp and the 10-byte readings
//! - [`BusState`] - diffs the readings against the last known bus state
//! - [`AlertRegistry`] - evaluates threshold rules once per session
//! - [`SessionManager`] - the IDLE/ACTIVE state machine accumulating changes
//! - [`TraceExporter`] - writes the change log when the session ends
//!
//! [`SessionEngine`] runs a manager on a tokio task with the watchdog that
//! ends a session after a period of silence.
//!
//! The library does NOT:
//! - Connect to the MQTT broker
//! - Deliver notifications (see the [`Notifier`] trait)
//! - Persist bus state across restarts
//!
//! # Example Usage
//!
//! ```no_run
//! use can_session_engine::{EngineConfig, LogNotifier, SessionEngine};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() {
//! let config = EngineConfig::new().with_output_dir("art_logs");
//! let engine = SessionEngine::new(&config, Arc::new(LogNotifier));
//!
//! let (tx, rx) = mpsc::channel(64);
//! let engine_task = tokio::spawn(engine.run(rx));
//!
//! // feed raw MQTT payloads
//! tx.send(vec![0, 0, 0, 0, 0]).await.unwrap();
//!
//! drop(tx);
//! engine_task.await.unwrap();
//! # }
//! ```

// Public modules
pub mod alerts;
pub mod config;
pub mod engine;
pub mod frame;
pub mod notify;
pub mod session;
pub mod state;
pub mod trace;
pub mod types;

// Re-export main types for convenience
pub use alerts::{
    Alert, AlertFlags, AlertRegistry, AlertRule, Comparison, ThresholdRule, LOW_VOLTAGE_RULE,
};
pub use config::{
    AlertsConfig, EngineConfig, ThresholdRuleConfig, TraceConfig, DEFAULT_WATCHDOG_TIMEOUT_MS,
    MIN_WATCHDOG_TIMEOUT_MS,
};
pub use engine::SessionEngine;
pub use frame::FrameDecoder;
pub use notify::{LogNotifier, Notification, Notifier};
pub use session::{SessionManager, SessionPhase};
pub use state::BusState;
pub use trace::TraceExporter;
pub use types::{
    ChangeEvent, DecodedFrame, EndReason, EngineError, FinishedSession, Reading, Result,
    SessionTimestamp, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
