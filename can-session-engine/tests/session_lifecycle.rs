// End-to-end session lifecycle through the async engine
use can_session_engine::{EndReason, EngineConfig, Notification, Notifier, SessionEngine};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    fn ended(&self) -> Vec<(EndReason, usize, std::path::PathBuf)> {
        self.sent()
            .into_iter()
            .filter_map(|n| match n {
                Notification::SessionEnded {
                    reason,
                    events,
                    artifact,
                    ..
                } => Some((reason, events, artifact)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn frame(timestamp: u32, readings: &[(u16, [u8; 8])]) -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    for (id, data) in readings {
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(data);
    }
    bytes
}

fn start(
    dir: &Path,
) -> (
    Arc<RecordingNotifier>,
    mpsc::Sender<Vec<u8>>,
    JoinHandle<can_session_engine::SessionManager>,
) {
    let notifier = Arc::new(RecordingNotifier::default());
    let config = EngineConfig::new().with_output_dir(dir);
    let engine = SessionEngine::new(&config, notifier.clone());
    let (tx, rx) = mpsc::channel(16);
    (notifier, tx, tokio::spawn(engine.run(rx)))
}

#[tokio::test(start_paused = true)]
async fn watchdog_finalizes_once_after_silence() {
    let dir = tempfile::tempdir().unwrap();
    let (notifier, tx, handle) = start(dir.path());

    tx.send(frame(0, &[(10, [1; 8]), (20, [2; 8])])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    tx.send(frame(5000, &[(10, [1; 8]), (20, [9; 8])])).await.unwrap();

    // 9s after the last frame: still running
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(notifier.ended().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let ended = notifier.ended();
    assert_eq!(ended.len(), 1);
    let (reason, events, artifact) = &ended[0];
    assert_eq!(*reason, EndReason::WatchdogExpired);
    assert_eq!(*events, 3);

    let trace = std::fs::read_to_string(artifact).unwrap();
    let lines: Vec<&str> = trace.lines().skip(12).collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("    5  1         20    Rx            8  09 09 09"));

    // long silence afterwards does not finalize again
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(notifier.ended().len(), 1);

    drop(tx);
    let manager = handle.await.unwrap();
    assert!(!manager.is_active());
    assert!(manager.bus_state().is_empty());
    assert!(manager.change_log().is_empty());
    assert_eq!(notifier.ended().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_rearm_watchdog() {
    let dir = tempfile::tempdir().unwrap();
    let (notifier, tx, handle) = start(dir.path());

    tx.send(frame(0, &[(1, [1; 8])])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(8)).await;
    tx.send(vec![0u8; 14]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let ended = notifier.ended();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].1, 1);

    drop(tx);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn low_voltage_alert_sent_once_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let (notifier, tx, handle) = start(dir.path());
    let low = [0xE0, 0x2E, 0, 0, 0, 0, 0, 0];

    tx.send(frame(0, &[(0x185, low)])).await.unwrap();
    tx.send(frame(100, &[(0x185, low)])).await.unwrap();
    drop(tx);
    handle.await.unwrap();

    let alerts: Vec<Notification> = notifier
        .sent()
        .into_iter()
        .filter(|n| matches!(n, Notification::Alert(_)))
        .collect();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].is_urgent());
    assert_eq!(
        alerts[0].to_string(),
        "LV battery is low!! (Measured voltage 12V)."
    );
}

#[tokio::test(start_paused = true)]
async fn shorter_frame_restarts_session() {
    let dir = tempfile::tempdir().unwrap();
    let (notifier, tx, handle) = start(dir.path());

    let a = frame(900, &[(1, [1; 8]), (2, [2; 8]), (3, [3; 8])]);
    let b = frame(10, &[(2, [2; 8])]);
    tx.send(a).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    tx.send(b).await.unwrap();
    drop(tx);
    let manager = handle.await.unwrap();
    assert!(!manager.is_active());

    let sent = notifier.sent();
    let kinds: Vec<&str> = sent
        .iter()
        .map(|n| match n {
            Notification::SessionStarted { .. } => "start",
            Notification::SessionEnded { .. } => "end",
            Notification::Alert(_) => "alert",
            Notification::ExportFailed { .. } => "failed",
        })
        .collect();
    assert_eq!(kinds, vec!["start", "end", "start", "end"]);

    let ended = notifier.ended();
    assert_eq!(ended[0].0, EndReason::AnomalousRestart);
    assert_eq!(ended[0].1, 3);
    // B's single reading is new in the fresh session, not merged into A's state
    assert_eq!(ended[1].0, EndReason::Shutdown);
    assert_eq!(ended[1].1, 1);
    let second = std::fs::read_to_string(&ended[1].2).unwrap();
    assert!(second.lines().nth(12).unwrap().starts_with("    0.01  1         2    Rx"));
}
