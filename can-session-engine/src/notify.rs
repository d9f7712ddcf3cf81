//! Outbound notifications
//!
//! The engine decides *what* to announce; delivering it (chat channel,
//! webhook, log) is up to a [`Notifier`] implementation supplied by the
//! application.

use crate::alerts::Alert;
use crate::types::{EndReason, Timestamp};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Something humans should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// First valid frame after an idle period
    SessionStarted { started_at: Timestamp },

    /// An alert rule fired for the current session
    Alert(Alert),

    /// A session was finalized and its trace written
    SessionEnded {
        started_at: Timestamp,
        ended_at: Timestamp,
        reason: EndReason,
        /// Number of change events in the trace
        events: usize,
        /// Finished trace file, ready for upload
        artifact: PathBuf,
    },

    /// A session ended but its trace could not be written
    ExportFailed {
        ended_at: Timestamp,
        events: usize,
        error: String,
    },
}

impl Notification {
    /// Whether delivery should escalate (mention the alert role)
    pub fn is_urgent(&self) -> bool {
        match self {
            Notification::SessionStarted { .. } => true,
            Notification::Alert(alert) => alert.urgent,
            Notification::SessionEnded { .. } => false,
            Notification::ExportFailed { .. } => true,
        }
    }

    /// Trace file to attach, if any
    pub fn artifact(&self) -> Option<&PathBuf> {
        match self {
            Notification::SessionEnded { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::SessionStarted { .. } => write!(f, "Car started up! Recording log..."),
            Notification::Alert(alert) => write!(f, "{}", alert),
            Notification::SessionEnded { ended_at, .. } => write!(
                f,
                "Car session ended at {}, download log here:",
                ended_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Notification::ExportFailed {
                ended_at,
                events,
                error,
            } => write!(
                f,
                "Car session ended at {} but its log ({} changes) could not be written: {}",
                ended_at.format("%Y-%m-%d %H:%M:%S UTC"),
                events,
                error
            ),
        }
    }
}

/// Delivers notifications to humans
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.artifact() {
            Some(path) => log::info!("[notify] {} {:?}", notification, path),
            None if notification.is_urgent() => log::warn!("[notify] {}", notification),
            None => log::info!("[notify] {}", notification),
        }
        Ok(())
    }
}
