//! Session lifecycle
//!
//! [`SessionManager`] is the `IDLE`/`ACTIVE` state machine. It owns the bus
//! state, the current session's change log and alert flags, and drives the
//! decoder, the tracker, the alert rules and the trace exporter. It has no
//! notion of time passing: the caller reports watchdog expiry through
//! [`SessionManager::handle_watchdog`].
//!
//! Transitions:
//!
//! ```text
//! IDLE   --valid frame-->            ACTIVE  (start, SessionStarted)
//! ACTIVE --valid frame-->            ACTIVE  (diff, append, alerts)
//! ACTIVE --shorter valid frame-->    finalize, then IDLE --frame--> ACTIVE
//! ACTIVE --watchdog / shutdown-->    IDLE    (finalize, SessionEnded)
//! any    --malformed frame-->        unchanged
//! ```

use crate::alerts::{AlertFlags, AlertRegistry};
use crate::config::EngineConfig;
use crate::frame::FrameDecoder;
use crate::notify::Notification;
use crate::state::BusState;
use crate::trace::TraceExporter;
use crate::types::{ChangeEvent, EndReason, FinishedSession, Result, Timestamp};
use std::collections::VecDeque;

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
}

#[derive(Debug)]
struct ActiveSession {
    started_at: Timestamp,
    change_log: Vec<ChangeEvent>,
    alert_flags: AlertFlags,
    frames: usize,
}

impl ActiveSession {
    fn new(started_at: Timestamp) -> Self {
        Self {
            started_at,
            change_log: Vec::new(),
            alert_flags: AlertFlags::new(),
            frames: 0,
        }
    }
}

/// Owns all per-session state; driven by one caller at a time
pub struct SessionManager {
    alerts: AlertRegistry,
    exporter: TraceExporter,
    bus_state: BusState,
    session: Option<ActiveSession>,
    /// Byte length of the last valid frame of the current session
    last_frame_len: Option<usize>,
    /// Finished sessions whose trace could not be written yet
    retained: VecDeque<FinishedSession>,
    max_retained: usize,
}

impl SessionManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_parts(
            AlertRegistry::from_config(&config.alerts),
            TraceExporter::new(&config.output_dir, config.trace.clone()),
            config.max_retained_exports,
        )
    }

    pub fn with_parts(alerts: AlertRegistry, exporter: TraceExporter, max_retained: usize) -> Self {
        Self {
            alerts,
            exporter,
            bus_state: BusState::new(),
            session: None,
            last_frame_len: None,
            retained: VecDeque::new(),
            max_retained,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self.session {
            Some(_) => SessionPhase::Active,
            None => SessionPhase::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn bus_state(&self) -> &BusState {
        &self.bus_state
    }

    /// Change events recorded so far in the current session
    pub fn change_log(&self) -> &[ChangeEvent] {
        self.session
            .as_ref()
            .map(|s| s.change_log.as_slice())
            .unwrap_or(&[])
    }

    pub fn session_started_at(&self) -> Option<Timestamp> {
        self.session.as_ref().map(|s| s.started_at)
    }

    /// Sessions whose trace export failed and is pending retry
    pub fn retained_exports(&self) -> &VecDeque<FinishedSession> {
        &self.retained
    }

    /// Hand the retained sessions to the caller for manual recovery
    pub fn take_retained_exports(&mut self) -> Vec<FinishedSession> {
        self.retained.drain(..).collect()
    }

    /// Process one raw frame received at wall-clock time `now`
    ///
    /// A frame that fails to decode leaves every piece of state untouched and
    /// the error is returned to the caller. The caller must rearm the
    /// watchdog only on `Ok`.
    pub fn handle_frame(&mut self, payload: &[u8], now: Timestamp) -> Result<Vec<Notification>> {
        let frame = FrameDecoder::decode(payload)?;
        let mut notifications = Vec::new();

        if self.is_active() && self.last_frame_len.is_some_and(|prev| frame.len < prev) {
            log::warn!(
                "Frame shrank from {:?} to {} bytes mid-session, treating as a restart",
                self.last_frame_len,
                frame.len
            );
            notifications.extend(self.finalize(now, EndReason::AnomalousRestart));
        }

        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                let session = self.start(now);
                notifications.push(Notification::SessionStarted {
                    started_at: session.started_at,
                });
                session
            }
        };

        let alerts = self.alerts.evaluate(&frame.readings, &mut session.alert_flags);
        notifications.extend(alerts.into_iter().map(Notification::Alert));

        let (changes, next_state) = self.bus_state.diff(&frame);
        log::debug!(
            "Frame t={}ms: {} readings, {} changed",
            frame.timestamp,
            frame.readings.len(),
            changes.len()
        );
        session.change_log.extend(changes);
        session.frames += 1;

        self.bus_state = next_state;
        self.last_frame_len = Some(frame.len);
        self.session = Some(session);

        Ok(notifications)
    }

    /// The watchdog window elapsed without a valid frame
    pub fn handle_watchdog(&mut self, now: Timestamp) -> Vec<Notification> {
        if !self.is_active() {
            log::debug!("Watchdog fired while idle, ignoring");
            return Vec::new();
        }
        log::info!("No telemetry for the watchdog window, ending session");
        self.finalize(now, EndReason::WatchdogExpired)
    }

    /// Finalize an active session before the process exits
    pub fn shutdown(&mut self, now: Timestamp) -> Vec<Notification> {
        self.finalize(now, EndReason::Shutdown)
    }

    /// Try again to write every retained session
    pub fn retry_exports(&mut self) -> Vec<Notification> {
        let pending: Vec<FinishedSession> = self.retained.drain(..).collect();
        if !pending.is_empty() {
            log::info!("Retrying {} failed trace exports", pending.len());
        }
        pending
            .into_iter()
            .filter_map(|finished| self.export(finished, false))
            .collect()
    }

    fn start(&mut self, now: Timestamp) -> ActiveSession {
        log::info!("Session started at {}", now);
        self.bus_state.clear();
        self.last_frame_len = None;
        ActiveSession::new(now)
    }

    fn finalize(&mut self, now: Timestamp, reason: EndReason) -> Vec<Notification> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };

        log::info!(
            "Session ended ({}): {} frames, {} changes",
            reason,
            session.frames,
            session.change_log.len()
        );

        let finished = FinishedSession {
            started_at: session.started_at,
            ended_at: now,
            reason,
            change_log: session.change_log,
        };

        let mut notifications = self.retry_exports();
        notifications.extend(self.export(finished, true));

        self.bus_state.clear();
        self.last_frame_len = None;
        notifications
    }

    /// Write one finished session; on failure keep it for a later retry
    ///
    /// Only the first failure of a session produces a notification.
    fn export(&mut self, finished: FinishedSession, first_attempt: bool) -> Option<Notification> {
        match self
            .exporter
            .export(&finished.change_log, finished.ended_at)
        {
            Ok(artifact) => Some(Notification::SessionEnded {
                started_at: finished.started_at,
                ended_at: finished.ended_at,
                reason: finished.reason,
                events: finished.change_log.len(),
                artifact,
            }),
            Err(e) => {
                log::error!("Trace export failed, keeping session for retry: {}", e);
                let notification = first_attempt.then(|| Notification::ExportFailed {
                    ended_at: finished.ended_at,
                    events: finished.change_log.len(),
                    error: e.to_string(),
                });
                self.retain(finished);
                notification
            }
        }
    }

    fn retain(&mut self, finished: FinishedSession) {
        if self.max_retained == 0 {
            log::error!(
                "Dropping session ended at {} ({} changes): retention disabled",
                finished.ended_at,
                finished.change_log.len()
            );
            return;
        }
        while self.retained.len() >= self.max_retained {
            if let Some(dropped) = self.retained.pop_front() {
                log::error!(
                    "Retention full, dropping session ended at {} ({} changes)",
                    dropped.ended_at,
                    dropped.change_log.len()
                );
            }
        }
        self.retained.push_back(finished);
    }
}
