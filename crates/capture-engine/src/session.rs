//! Streaming session management.
//!
//! A [`FramingSession`] drives one capture source through the framing
//! engine into its sinks:
//!
//! ```text
//! Idle -> Starting -> Streaming -> Stopping -> Stopped
//! ```
//!
//! Whatever ends the session, the source, detector and every sink are
//! released and the shared [`StopSignal`] is raised before `run` returns.

use std::sync::Arc;

use serde::Serialize;
use stagefocus_common::clock::{effective_fps, FramePacer, SessionClock};
use stagefocus_common::config::{Settings, SettingsStore};
use stagefocus_common::error::{StagefocusError, StagefocusResult};
use stagefocus_common::signal::StopSignal;
use stagefocus_framing::{FramingEngine, FramingParams, Landmark, VISIBILITY_THRESHOLD};

use crate::detector::PoseDetector;
use crate::sink::FrameSink;
use crate::source::{CaptureSource, StreamInfo};

/// Per-session options that are not persisted in the settings file.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flip frames left to right before detection.
    pub mirror: bool,

    /// Sleep between frames to hold the source frame rate. Disabled for
    /// sources that already block at their own rate.
    pub pace: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mirror: true,
            pace: true,
        }
    }
}

/// State of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, not yet run.
    Idle,
    /// Acquiring the source and sinks.
    Starting,
    /// Frames flowing.
    Streaming,
    /// Releasing resources.
    Stopping,
    /// Finished. Terminal.
    Stopped,
}

/// Why streaming ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The shared stop signal was raised by the supervisor.
    Cancelled,
    /// The source failed or ran out of frames.
    SourceExhausted,
    /// The operator closed the preview.
    PreviewClosed,
    /// The pose detector failed.
    DetectorFailed,
    /// A sink rejected a frame.
    SinkFailed,
}

/// Counters and outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub stream: StreamInfo,
    pub effective_fps: u32,
    pub started_at: String,
    pub duration_secs: f64,
    pub frames_read: u64,
    pub frames_emitted: u64,
    /// Frames whose crop had no area.
    pub frames_skipped: u64,
    /// Frames framed as the full picture for lack of visible landmarks.
    pub frames_fallback: u64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Default)]
struct Counters {
    read: u64,
    emitted: u64,
    skipped: u64,
    fallback: u64,
}

/// Map persisted settings onto the engine's per-frame parameters.
pub fn framing_params(settings: &Settings) -> FramingParams {
    FramingParams {
        smoothing_factor: settings.smoothing_factor,
        padding_factor: settings.padding_factor,
    }
}

fn has_visible_landmark(landmarks: Option<&[Landmark]>) -> bool {
    landmarks.is_some_and(|lms| lms.iter().any(|lm| lm.visibility > VISIBILITY_THRESHOLD))
}

/// One streaming session from a capture source to its sinks.
pub struct FramingSession {
    config: SessionConfig,
    settings: Arc<SettingsStore>,
    stop: StopSignal,
    source: Box<dyn CaptureSource>,
    detector: Box<dyn PoseDetector>,
    sinks: Vec<Box<dyn FrameSink>>,
    state: SessionState,
}

impl FramingSession {
    pub fn new(
        config: SessionConfig,
        settings: Arc<SettingsStore>,
        stop: StopSignal,
        source: Box<dyn CaptureSource>,
        detector: Box<dyn PoseDetector>,
    ) -> Self {
        Self {
            config,
            settings,
            stop,
            source,
            detector,
            sinks: Vec::new(),
            state: SessionState::Idle,
        }
    }

    /// Add a sink. Sinks receive frames in the order they were added.
    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion on the calling thread.
    ///
    /// Errors only when the session cannot start; once streaming, every
    /// ending is reported through [`SessionReport::stop_reason`].
    pub fn run(&mut self) -> StagefocusResult<SessionReport> {
        if self.state != SessionState::Idle {
            return Err(StagefocusError::capture("Session already ran"));
        }
        if self.sinks.is_empty() {
            self.state = SessionState::Stopped;
            self.stop.raise();
            return Err(StagefocusError::unsupported(
                "A session needs a virtual camera or a preview",
            ));
        }

        self.state = SessionState::Starting;
        let result = self.start_and_stream();

        self.state = SessionState::Stopping;
        self.release();
        self.state = SessionState::Stopped;
        if self.stop.raise() {
            tracing::debug!("Stop signal raised by session");
        }

        match &result {
            Ok(report) => tracing::info!(
                reason = ?report.stop_reason,
                frames_read = report.frames_read,
                frames_emitted = report.frames_emitted,
                duration_secs = report.duration_secs,
                "Session stopped"
            ),
            Err(e) => tracing::error!(error = %e, "Session failed to start"),
        }
        result
    }

    fn start_and_stream(&mut self) -> StagefocusResult<SessionReport> {
        let stream = self.source.open()?;
        if !stream.size.is_valid() {
            return Err(StagefocusError::capture(format!(
                "Capture source reported an empty {}x{} frame",
                stream.size.width, stream.size.height
            )));
        }

        let fps = effective_fps(stream.fps);
        if stream.fps == 0 {
            tracing::warn!(default_fps = fps, "Source did not report a frame rate");
        }
        tracing::info!(
            "Source: {}x{} @ {} FPS",
            stream.size.width,
            stream.size.height,
            fps
        );

        let sink_stream = StreamInfo { fps, ..stream };
        for sink in &mut self.sinks {
            sink.open(&sink_stream)?;
        }

        self.state = SessionState::Streaming;
        let clock = SessionClock::start();
        let mut counters = Counters::default();
        let stop_reason = self.stream(sink_stream, &mut counters);

        Ok(SessionReport {
            stream,
            effective_fps: fps,
            started_at: clock.epoch_wall().to_string(),
            duration_secs: clock.elapsed_secs(),
            frames_read: counters.read,
            frames_emitted: counters.emitted,
            frames_skipped: counters.skipped,
            frames_fallback: counters.fallback,
            stop_reason,
        })
    }

    fn stream(&mut self, stream: StreamInfo, counters: &mut Counters) -> StopReason {
        let mut engine = FramingEngine::new(stream.size);
        let mut pacer = FramePacer::new(stream.fps);

        loop {
            if self.stop.is_raised() {
                tracing::info!("Stop requested");
                return StopReason::Cancelled;
            }
            if self.sinks.iter_mut().any(|sink| sink.close_requested()) {
                return StopReason::PreviewClosed;
            }

            let mut frame = match self.source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Capture source ended");
                    return StopReason::SourceExhausted;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read frame");
                    return StopReason::SourceExhausted;
                }
            };
            counters.read += 1;

            if frame.size() != stream.size {
                tracing::warn!(
                    index = frame.index(),
                    width = frame.width(),
                    height = frame.height(),
                    "Dropping frame with unexpected geometry"
                );
                counters.skipped += 1;
                continue;
            }

            if self.config.mirror {
                frame.mirror_horizontal();
            }

            let landmarks = match self.detector.detect(&frame) {
                Ok(landmarks) => landmarks,
                Err(e) if self.stop.is_raised() => {
                    tracing::info!(error = %e, "Stop requested during detection");
                    return StopReason::Cancelled;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pose detector failed");
                    return StopReason::DetectorFailed;
                }
            };
            if !has_visible_landmark(landmarks.as_deref()) {
                counters.fallback += 1;
            }

            // Settings may change mid-session; read them fresh every tick.
            let params = framing_params(&self.settings.snapshot());
            let step = engine.step(landmarks.as_deref(), &params);

            let Some(rect) = step.crop else {
                tracing::debug!(index = frame.index(), smoothed = ?step.smoothed, "Skipping degenerate crop");
                counters.skipped += 1;
                continue;
            };

            let output = match frame.crop_resize(rect, stream.size) {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(index = frame.index(), error = %e, "Skipping frame");
                    counters.skipped += 1;
                    continue;
                }
            };

            for sink in &mut self.sinks {
                if let Err(e) = sink.send(&output) {
                    tracing::error!(sink = sink.name(), error = %e, "Sink failed");
                    return StopReason::SinkFailed;
                }
            }
            counters.emitted += 1;
            tracing::trace!(index = output.index(), ?rect, "Frame emitted");

            if self.config.pace {
                pacer.sleep_until_next_frame();
            }
        }
    }

    fn release(&mut self) {
        for sink in &mut self.sinks {
            sink.close();
        }
        self.detector.close();
        self.source.close();
        tracing::info!("Session resources released");
    }
}
