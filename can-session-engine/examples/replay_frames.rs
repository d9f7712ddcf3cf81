//! Replay captured telemetry frames through the session engine
//!
//! Reads a text file with one frame per line as hex (spaces allowed), feeds
//! every frame to a SessionManager one second apart, ends the session and
//! prints where the trace was written.
//!
//! Usage:
//!   replay_frames <frames.hex> [--out <dir>]
//!
//! Example:
//!   replay_frames capture.hex --out replay_logs

use can_session_engine::{EngineConfig, Notification, SessionManager};
use chrono::{Duration, Utc};
use std::env;
use std::fs;

fn parse_hex_line(line: &str) -> Option<Vec<u8>> {
    let digits: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

fn print_notifications(notifications: &[Notification]) {
    for notification in notifications {
        match notification.artifact() {
            Some(path) => println!("  -> {} {:?}", notification, path),
            None => println!("  -> {}", notification),
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <frames.hex> [--out <dir>]", args[0]);
        std::process::exit(1);
    }

    let input = &args[1];
    let out_dir = args
        .iter()
        .position(|a| a == "--out")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "replay_logs".to_string());

    let content = match fs::read_to_string(input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to read {}: {}", input, e);
            std::process::exit(1);
        }
    };

    let mut manager = SessionManager::new(&EngineConfig::new().with_output_dir(&out_dir));
    let start = Utc::now();
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(frame) = parse_hex_line(line) else {
            eprintln!("line {}: not valid hex, skipped", index + 1);
            rejected += 1;
            continue;
        };

        let now = start + Duration::seconds(index as i64);
        match manager.handle_frame(&frame, now) {
            Ok(notifications) => {
                accepted += 1;
                print_notifications(&notifications);
            }
            Err(e) => {
                eprintln!("line {}: {}", index + 1, e);
                rejected += 1;
            }
        }
    }

    println!("\n=== REPLAY SUMMARY ===");
    println!("Frames accepted: {}", accepted);
    println!("Frames rejected: {}", rejected);
    println!("Changes in open session: {}", manager.change_log().len());

    let end = start + Duration::seconds(content.lines().count() as i64 + 10);
    print_notifications(&manager.handle_watchdog(end));
}
