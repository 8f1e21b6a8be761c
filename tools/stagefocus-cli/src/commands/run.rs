//! Start a streaming session and supervise it.
//!
//! The session runs on its own thread. This task watches for Ctrl+C and
//! operator commands on stdin, and exits once the stop signal is raised by
//! either side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stagefocus_capture_engine::{
    FramingSession, GstFrameSink, GstWebcamSource, SessionConfig, SessionReport,
    SubprocessDetector,
};
use stagefocus_common::config::SettingsStore;
use stagefocus_common::StopSignal;
use tokio::sync::mpsc;

use crate::commands::settings::print_settings;
use crate::control::{parse_control_command, ControlCommand, HELP};

pub struct RunOptions {
    pub webcam: Option<u32>,
    /// `None` disables the virtual camera.
    pub virtual_device: Option<String>,
    pub preview: bool,
    pub mirror: bool,
    pub detector: String,
}

pub async fn run(settings_path: PathBuf, options: RunOptions) -> anyhow::Result<()> {
    if options.virtual_device.is_none() && !options.preview {
        anyhow::bail!("Nothing to stream to: enable the virtual camera or the preview");
    }

    let store = Arc::new(SettingsStore::new(settings_path));
    let webcam_id = options.webcam.unwrap_or(store.snapshot().webcam_id);

    println!("Starting StageFocus");
    println!("  Webcam: {webcam_id}");
    match &options.virtual_device {
        Some(device) => println!("  Virtual camera: {device}"),
        None => println!("  Virtual camera: off"),
    }
    println!("  Preview: {}", if options.preview { "on" } else { "off" });
    println!("  Mirror: {}", if options.mirror { "on" } else { "off" });
    println!("  Settings: {}", store.path().display());
    println!();

    let stop = StopSignal::new();
    let detector = SubprocessDetector::spawn(&options.detector)?.with_cancel(stop.clone());

    let mut session = FramingSession::new(
        SessionConfig {
            mirror: options.mirror,
            pace: true,
        },
        Arc::clone(&store),
        stop.clone(),
        Box::new(GstWebcamSource::new(webcam_id)),
        Box::new(detector),
    );
    if let Some(device) = options.virtual_device {
        session = session.with_sink(Box::new(GstFrameSink::virtual_camera(device)));
    }
    if options.preview {
        session = session.with_sink(Box::new(GstFrameSink::preview()));
    }

    let driver = std::thread::Builder::new()
        .name("framing-driver".to_string())
        .spawn(move || session.run())
        .context("Failed to start the streaming thread")?;

    println!("Type 'help' for commands. Press Ctrl+C or type 'exit' to stop...");
    println!();
    supervise(&store, &stop).await;

    let joined = tokio::task::spawn_blocking(move || driver.join());
    let report = tokio::select! {
        joined = joined => joined?.map_err(|_| anyhow::anyhow!("Streaming thread panicked"))??,
        _ = tokio::signal::ctrl_c() => {
            // The blocking pool would wait on the driver at runtime shutdown
            eprintln!("Interrupted again; exiting without waiting for the streaming thread");
            std::process::exit(130);
        }
    };

    print_report(&report);
    Ok(())
}

/// Wait until the stop signal is raised, reacting to operator input.
async fn supervise(store: &SettingsStore, stop: &StopSignal) {
    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => tracing::info!("Ctrl+C received"),
                    Err(e) => tracing::warn!(error = %e, "Ctrl+C handler failed"),
                }
                stop.raise();
                break;
            }
            line = lines.recv(), if stdin_open => match line {
                Some(line) => handle_command(store, stop, parse_control_command(&line)),
                None => {
                    tracing::debug!("stdin closed; control surface disabled");
                    stdin_open = false;
                }
            },
            _ = poll.tick() => {}
        }

        if stop.is_raised() {
            break;
        }
    }
}

fn handle_command(store: &SettingsStore, stop: &StopSignal, command: ControlCommand) {
    match command {
        ControlCommand::ShowSettings => print_settings(&store.snapshot()),
        ControlCommand::Set { key, value } => match store.set_from_text(&key, &value) {
            Ok(value) => println!("{} = {value}", key.to_ascii_uppercase()),
            Err(e) => println!("{e}"),
        },
        ControlCommand::Exit => {
            tracing::info!("Exit requested");
            stop.raise();
        }
        ControlCommand::Help => println!("{HELP}"),
        ControlCommand::Empty => {}
        ControlCommand::Unknown(line) => println!("Unknown command '{line}'. {HELP}"),
    }
}

/// Forward stdin lines from a detached thread so a pending read never
/// holds up shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-control".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Control surface unavailable");
    }
    rx
}

fn print_report(report: &SessionReport) {
    println!();
    println!("Session ended: {:?}", report.stop_reason);
    println!(
        "  Source: {}x{} @ {} FPS",
        report.stream.size.width, report.stream.size.height, report.effective_fps
    );
    println!("  Duration: {:.1}s", report.duration_secs);
    println!(
        "  Frames: {} read, {} emitted, {} skipped, {} full-frame",
        report.frames_read, report.frames_emitted, report.frames_skipped, report.frames_fallback
    );
}
