//! Core types for the CAN session engine
//!
//! This module defines the fixed-shape records that flow through the engine:
//! readings decoded from a telemetry frame, the change events recorded while a
//! session is active, and the error type shared by every stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Wall-clock timestamp used for session start/end
pub type Timestamp = DateTime<Utc>;

/// Device-supplied milliseconds since the session-relative epoch
pub type SessionTimestamp = u32;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Fixed frame header: 1 reserved byte followed by the 4-byte timestamp
pub const HEADER_SIZE: usize = 5;

/// On-wire size of one reading: 2-byte id + 8 data bytes
pub const READING_SIZE: usize = 10;

/// Number of data bytes carried by every reading
pub const DATA_LEN: usize = 8;

/// One bus identifier and its payload, as decoded from a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reading {
    /// CAN identifier
    pub id: u16,
    /// Raw data bytes, in wire order
    pub data: [u8; DATA_LEN],
}

impl Reading {
    pub fn new(id: u16, data: [u8; DATA_LEN]) -> Self {
        Self { id, data }
    }

    /// Little-endian u16 starting at `offset` in the data bytes
    pub fn u16_le(&self, offset: usize) -> Option<u16> {
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// A frame after successful decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Session timestamp from the frame header
    pub timestamp: SessionTimestamp,
    /// Readings in offset order
    pub readings: Vec<Reading>,
    /// Raw byte length of the frame
    pub len: usize,
}

/// A reading whose data differed from the last known bus state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Session timestamp of the frame that carried the change
    pub time: SessionTimestamp,
    /// CAN identifier
    pub id: u16,
    /// New data bytes
    pub data: [u8; DATA_LEN],
}

impl ChangeEvent {
    pub fn new(time: SessionTimestamp, reading: &Reading) -> Self {
        Self {
            time,
            id: reading.id,
            data: reading.data,
        }
    }

    /// Elapsed session time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        f64::from(self.time) / 1000.0
    }
}

/// Why a session was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// No valid frame arrived within the watchdog window
    WatchdogExpired,
    /// A shorter frame arrived mid-session: the vehicle power-cycled
    AnomalousRestart,
    /// The inbound stream closed
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::WatchdogExpired => write!(f, "watchdog expired"),
            EndReason::AnomalousRestart => write!(f, "anomalous restart"),
            EndReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A session that has ended and whose change log awaits export
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSession {
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub reason: EndReason,
    pub change_log: Vec<ChangeEvent>,
}

/// Errors that can occur inside the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Malformed frame: length {len} is not a 5-byte header plus whole 10-byte readings")]
    MalformedFrame { len: usize },

    #[error("Decode out of range: offset {offset} in a {len}-byte frame")]
    DecodeRange { offset: usize, len: usize },

    #[error("Failed to write trace log {path:?}: {source}")]
    ExportWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// True for errors that mean the inbound frame should just be dropped
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedFrame { .. } | EngineError::DecodeRange { .. }
        )
    }
}
