//! Async session driver
//!
//! Runs a [`SessionManager`] on a single task. Inbound frames and the
//! watchdog deadline are polled by the same `select!`, so watchdog expiry can
//! never interleave with frame processing and resetting the deadline always
//! supersedes the previous one.
//!
//! Notifications are handed to a separate dispatcher task in order; a slow or
//! failing notifier never stalls frame processing.
//!
//! Finalizing a session writes the trace with blocking file I/O. On a
//! multi-thread runtime those calls run under `block_in_place`; on a
//! current-thread runtime they block the loop until the write completes.

use crate::config::EngineConfig;
use crate::notify::{Notification, Notifier};
use crate::session::SessionManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::{self, Instant};

/// Frame-driven session engine with a watchdog
pub struct SessionEngine {
    manager: SessionManager,
    notifier: Arc<dyn Notifier>,
    watchdog_timeout: Duration,
}

impl SessionEngine {
    pub fn new(config: &EngineConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::from_manager(SessionManager::new(config), config.watchdog_timeout(), notifier)
    }

    pub fn from_manager(
        manager: SessionManager,
        watchdog_timeout: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            manager,
            notifier,
            watchdog_timeout,
        }
    }

    /// Process frames until the sender side closes
    ///
    /// On close, an active session is finalized and all pending
    /// notifications are delivered before the manager is returned.
    pub async fn run(self, mut frames: mpsc::Receiver<Vec<u8>>) -> SessionManager {
        let SessionEngine {
            mut manager,
            notifier,
            watchdog_timeout,
        } = self;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(notifier, notify_rx));

        let watchdog = time::sleep(watchdog_timeout);
        tokio::pin!(watchdog);
        let mut armed = false;

        log::info!(
            "Session engine running (watchdog {} ms)",
            watchdog_timeout.as_millis()
        );

        loop {
            tokio::select! {
                biased;

                () = &mut watchdog, if armed => {
                    armed = false;
                    forward(&notify_tx, blocking(|| manager.handle_watchdog(Utc::now())));
                }
                frame = frames.recv() => {
                    let Some(payload) = frame else {
                        log::info!("Frame source closed, stopping session engine");
                        break;
                    };
                    match blocking(|| manager.handle_frame(&payload, Utc::now())) {
                        Ok(notifications) => {
                            watchdog.as_mut().reset(Instant::now() + watchdog_timeout);
                            armed = true;
                            forward(&notify_tx, notifications);
                        }
                        Err(e) => log::warn!("Dropping frame ({} bytes): {}", payload.len(), e),
                    }
                }
            }
        }

        forward(&notify_tx, blocking(|| manager.shutdown(Utc::now())));
        drop(notify_tx);
        if let Err(e) = dispatcher.await {
            log::error!("Notification dispatcher stopped abnormally: {}", e);
        }

        manager
    }
}

/// Run a manager call that may write trace files
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::MultiThread => task::block_in_place(f),
        _ => f(),
    }
}

fn forward(tx: &mpsc::UnboundedSender<Notification>, notifications: Vec<Notification>) {
    for notification in notifications {
        if tx.send(notification).is_err() {
            log::error!("Notification dispatcher is gone, dropping notification");
        }
    }
}

async fn dispatch(notifier: Arc<dyn Notifier>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        if let Err(e) = notifier.notify(&notification).await {
            log::error!("Failed to deliver notification \"{}\": {:#}", notification, e);
        }
    }
}
