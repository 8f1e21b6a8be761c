//! GStreamer pipeline plumbing shared by the webcam source and the frame
//! sinks.
//!
//! Every pipeline is built from a launch string, carries a name for log
//! output, and exposes its `appsink`/`appsrc` endpoints by element name.

use std::sync::OnceLock;
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use stagefocus_common::error::{StagefocusError, StagefocusResult};

/// How long `start` waits for the pipeline to reach `Playing`.
const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop` waits for EOS to drain through the pipeline.
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A named GStreamer pipeline built from a launch description.
pub struct GstPipeline {
    name: String,
    pipeline: gst::Pipeline,
    running: bool,
}

impl GstPipeline {
    pub fn from_launch(name: impl Into<String>, launch: &str) -> StagefocusResult<Self> {
        init_gstreamer()?;
        let name = name.into();
        tracing::debug!(pipeline = %name, launch, "Building pipeline");

        let element = gst::parse::launch(launch).map_err(|e| {
            StagefocusError::capture(format!("Failed to build {name} pipeline: {e}"))
        })?;

        let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
            StagefocusError::capture(format!("{name} launch string did not produce a pipeline"))
        })?;

        Ok(Self {
            name,
            pipeline,
            running: false,
        })
    }

    /// Look up the `appsink` element called `element`.
    pub fn app_sink(&self, element: &str) -> StagefocusResult<gst_app::AppSink> {
        self.pipeline
            .by_name(element)
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| {
                StagefocusError::capture(format!("{} pipeline has no appsink '{element}'", self.name))
            })
    }

    /// Look up the `appsrc` element called `element`.
    pub fn app_src(&self, element: &str) -> StagefocusResult<gst_app::AppSrc> {
        self.pipeline
            .by_name(element)
            .and_then(|e| e.dynamic_cast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| {
                StagefocusError::sink(format!("{} pipeline has no appsrc '{element}'", self.name))
            })
    }

    /// Set the pipeline to `Playing` and wait for the transition.
    pub fn start(&mut self) -> StagefocusResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            StagefocusError::capture(format!("Failed to start {} pipeline: {e:?}", self.name))
        })?;

        // State changes are async; a live source has not opened its device
        // until the pipeline reports Playing.
        match self.pipeline.state(clock_time(STATE_CHANGE_TIMEOUT)) {
            (Ok(_), gst::State::Playing, _) => {}
            (Ok(_), state, _) => {
                tracing::warn!(
                    pipeline = %self.name,
                    ?state,
                    "Pipeline did not reach Playing state within timeout"
                );
            }
            (Err(e), _, _) => {
                let detail = self.pop_error().unwrap_or_else(|| format!("{e:?}"));
                let _ = self.pipeline.set_state(gst::State::Null);
                return Err(StagefocusError::capture(format!(
                    "{} pipeline failed to reach Playing state: {detail}",
                    self.name
                )));
            }
        }

        self.running = true;
        Ok(())
    }

    /// Drain with EOS (when `drain` is set) and shut the pipeline down.
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self, drain: bool) -> StagefocusResult<()> {
        if !self.running {
            return Ok(());
        }

        if drain {
            if self.pipeline.send_event(gst::event::Eos::new()) {
                self.wait_for_eos();
            } else {
                tracing::debug!(pipeline = %self.name, "Pipeline did not accept EOS");
            }
        }

        self.running = false;
        self.pipeline.set_state(gst::State::Null).map_err(|e| {
            StagefocusError::capture(format!("Failed to stop {} pipeline: {e:?}", self.name))
        })?;
        Ok(())
    }

    /// Non-blocking check for a terminal bus message (error or EOS).
    ///
    /// Returns a description of the message when one is pending.
    pub fn poll_terminal_message(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])?;
        match msg.view() {
            gst::MessageView::Error(e) => Some(format!("error: {}", e.error())),
            gst::MessageView::Eos(_) => Some("end of stream".to_string()),
            _ => None,
        }
    }

    fn wait_for_eos(&self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        let deadline = std::time::Instant::now() + EOS_DRAIN_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                tracing::warn!(pipeline = %self.name, "EOS drain timed out");
                return;
            }
            let Some(msg) = bus.timed_pop_filtered(
                clock_time(remaining),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            ) else {
                tracing::warn!(pipeline = %self.name, "EOS drain timed out");
                return;
            };
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!(pipeline = %self.name, "EOS received; pipeline drained");
                    return;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(
                        pipeline = %self.name,
                        error = %e.error(),
                        "Pipeline error during EOS drain"
                    );
                    return;
                }
                _ => {}
            }
        }
    }

    fn pop_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(e) => Some(e.error().to_string()),
            _ => None,
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if self.running {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

/// Initialize GStreamer once per process.
pub fn init_gstreamer() -> StagefocusResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(StagefocusError::capture(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether a GStreamer element factory is registered.
pub fn element_available(factory: &str) -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find(factory).is_some()
}

pub(crate) fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

/// Copy `height` rows of `row_bytes` out of a buffer whose rows are
/// `stride` bytes apart, dropping the padding.
pub(crate) fn pack_rows(
    data: &[u8],
    stride: usize,
    row_bytes: usize,
    height: usize,
) -> StagefocusResult<Vec<u8>> {
    if stride < row_bytes {
        return Err(StagefocusError::capture(format!(
            "Row stride {stride} is shorter than row width {row_bytes}"
        )));
    }
    if stride == row_bytes {
        let len = row_bytes * height;
        return data
            .get(..len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| short_buffer(data.len(), len));
    }

    let needed = if height == 0 {
        0
    } else {
        stride * (height - 1) + row_bytes
    };
    if data.len() < needed {
        return Err(short_buffer(data.len(), needed));
    }

    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        packed.extend_from_slice(&data[start..start + row_bytes]);
    }
    Ok(packed)
}

/// Lay tightly packed rows out at `stride` bytes apart, zero-filling the
/// padding.
pub(crate) fn pad_rows(packed: &[u8], row_bytes: usize, stride: usize, height: usize) -> Vec<u8> {
    if stride == row_bytes {
        return packed.to_vec();
    }
    let mut padded = vec![0u8; stride * height];
    for (row, chunk) in packed.chunks_exact(row_bytes).take(height).enumerate() {
        let start = row * stride;
        padded[start..start + row_bytes].copy_from_slice(chunk);
    }
    padded
}

fn short_buffer(actual: usize, needed: usize) -> StagefocusError {
    StagefocusError::capture(format!(
        "Frame buffer holds {actual} bytes, expected at least {needed}"
    ))
}
