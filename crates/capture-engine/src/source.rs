//! Capture sources: where raw frames come from.

use std::time::Duration;

use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use serde::Serialize;
use stagefocus_common::error::{StagefocusError, StagefocusResult};
use stagefocus_framing::FrameSize;

use crate::frame::Frame;
use crate::pipeline::{clock_time, pack_rows, GstPipeline};

/// Geometry and rate reported by a source when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub size: FrameSize,
    /// Frames per second as reported; `0` when unknown.
    pub fps: u32,
}

/// A producer of fixed-size RGB frames.
pub trait CaptureSource: Send {
    /// Acquire the device and report its negotiated geometry.
    fn open(&mut self) -> StagefocusResult<StreamInfo>;

    /// Read the next frame. `Ok(None)` means the source has no more frames.
    fn read_frame(&mut self) -> StagefocusResult<Option<Frame>>;

    /// Release the device. Must be safe to call when not open.
    fn close(&mut self);
}

/// How long `open` waits for the first frame to learn the negotiated caps.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-frame read timeout; a stalled device ends the stream.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Webcam capture through GStreamer into an RGB `appsink`.
pub struct GstWebcamSource {
    webcam_id: u32,
    pipeline: Option<GstPipeline>,
    sink: Option<gst_app::AppSink>,
    pending: Option<Frame>,
    next_index: u64,
}

impl GstWebcamSource {
    pub fn new(webcam_id: u32) -> Self {
        Self {
            webcam_id,
            pipeline: None,
            sink: None,
            pending: None,
            next_index: 0,
        }
    }

    fn pull(&mut self, timeout: Duration) -> StagefocusResult<Option<Frame>> {
        let Some(sink) = self.sink.as_ref() else {
            return Err(StagefocusError::capture("Webcam source is not open"));
        };
        let Some(sample) = sink.try_pull_sample(clock_time(timeout)) else {
            if sink.is_eos() {
                return Ok(None);
            }
            return Err(StagefocusError::capture(format!(
                "No frame from webcam {} within {}ms",
                self.webcam_id,
                timeout.as_millis()
            )));
        };

        let info = video_info(&sample)?;
        let frame = frame_from_sample(&sample, &info, self.next_index)?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

impl CaptureSource for GstWebcamSource {
    fn open(&mut self) -> StagefocusResult<StreamInfo> {
        let launch = webcam_launch(self.webcam_id);
        let mut pipeline = GstPipeline::from_launch("webcam", &launch)?;
        let sink = pipeline.app_sink("sink")?;
        pipeline.start().map_err(|e| {
            StagefocusError::capture(format!("Cannot open webcam {}: {e}", self.webcam_id))
        })?;
        self.pipeline = Some(pipeline);
        self.sink = Some(sink);

        // Pull one frame so the negotiated caps are known.
        let sample = self
            .sink
            .as_ref()
            .and_then(|s| s.try_pull_sample(clock_time(FIRST_FRAME_TIMEOUT)))
            .ok_or_else(|| {
                StagefocusError::capture(format!(
                    "Webcam {} produced no frames within {}s",
                    self.webcam_id,
                    FIRST_FRAME_TIMEOUT.as_secs()
                ))
            })?;
        let info = video_info(&sample)?;
        self.pending = Some(frame_from_sample(&sample, &info, 0)?);
        self.next_index = 1;

        Ok(StreamInfo {
            size: FrameSize::new(info.width(), info.height()),
            fps: reported_fps(info.fps()),
        })
    }

    fn read_frame(&mut self) -> StagefocusResult<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.pull(READ_TIMEOUT)
    }

    fn close(&mut self) {
        self.sink = None;
        self.pending = None;
        if let Some(mut pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.stop(false) {
                tracing::warn!(error = %e, "Failed to stop webcam pipeline");
            }
        }
    }
}

impl Drop for GstWebcamSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Launch description for the platform's webcam element.
pub fn webcam_launch(webcam_id: u32) -> String {
    format!(
        "{} ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=2 drop=true sync=false",
        webcam_element(webcam_id)
    )
}

#[cfg(target_os = "linux")]
fn webcam_element(webcam_id: u32) -> String {
    format!("v4l2src device=/dev/video{webcam_id}")
}

#[cfg(target_os = "windows")]
fn webcam_element(webcam_id: u32) -> String {
    format!("ksvideosrc device-index={webcam_id}")
}

#[cfg(target_os = "macos")]
fn webcam_element(webcam_id: u32) -> String {
    format!("avfvideosrc device-index={webcam_id}")
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
fn webcam_element(_webcam_id: u32) -> String {
    "autovideosrc".to_string()
}

/// Name of the GStreamer element the platform captures with.
pub fn webcam_factory() -> &'static str {
    if cfg!(target_os = "linux") {
        "v4l2src"
    } else if cfg!(target_os = "windows") {
        "ksvideosrc"
    } else if cfg!(target_os = "macos") {
        "avfvideosrc"
    } else {
        "autovideosrc"
    }
}

/// Round a caps frame rate to whole frames per second; `0` when unknown.
fn reported_fps(rate: gst::Fraction) -> u32 {
    fraction_to_fps(rate.numer(), rate.denom())
}

fn fraction_to_fps(numer: i32, denom: i32) -> u32 {
    if numer <= 0 || denom <= 0 {
        return 0;
    }
    (numer as f64 / denom as f64).round() as u32
}

fn video_info(sample: &gst::Sample) -> StagefocusResult<gst_video::VideoInfo> {
    let caps = sample
        .caps()
        .ok_or_else(|| StagefocusError::capture("Webcam sample carries no caps"))?;
    gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| StagefocusError::capture(format!("Unreadable webcam caps: {e}")))
}

fn frame_from_sample(
    sample: &gst::Sample,
    info: &gst_video::VideoInfo,
    index: u64,
) -> StagefocusResult<Frame> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| StagefocusError::capture("Webcam sample carries no buffer"))?;
    let map = buffer
        .map_readable()
        .map_err(|e| StagefocusError::capture(format!("Cannot map webcam buffer: {e}")))?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
    let row_bytes = width as usize * 3;
    let data = pack_rows(map.as_slice(), stride, row_bytes, height as usize)?;
    Frame::from_raw(index, width, height, data)
}
