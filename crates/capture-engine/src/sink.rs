//! Frame sinks: the virtual camera device and the preview window.

use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use stagefocus_common::error::{StagefocusError, StagefocusResult};
use stagefocus_framing::FrameSize;

use crate::frame::Frame;
use crate::pipeline::{pad_rows, GstPipeline};
use crate::source::StreamInfo;

/// Default v4l2loopback device the virtual camera writes to.
pub const DEFAULT_VIRTUAL_DEVICE: &str = "/dev/video10";

/// A consumer of processed frames.
pub trait FrameSink: Send {
    /// Short name for log output.
    fn name(&self) -> &str;

    /// Fix the sink's geometry and rate. Frames sent later must match.
    fn open(&mut self, stream: &StreamInfo) -> StagefocusResult<()>;

    /// Submit one frame. An error is fatal to the session.
    fn send(&mut self, frame: &Frame) -> StagefocusResult<()>;

    /// Whether the operator asked to stop through this sink (for example
    /// by closing the preview window).
    fn close_requested(&mut self) -> bool {
        false
    }

    /// Release the sink. Must be safe to call when not open.
    fn close(&mut self);
}

/// What a [`GstFrameSink`] feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// A v4l2loopback device other applications read as a webcam.
    VirtualCamera { device: String },
    /// An on-screen window.
    Preview,
}

impl SinkKind {
    fn label(&self) -> &'static str {
        match self {
            SinkKind::VirtualCamera { .. } => "virtual-camera",
            SinkKind::Preview => "preview",
        }
    }

    /// Launch description downstream of the `appsrc`.
    pub fn launch_tail(&self) -> String {
        match self {
            SinkKind::VirtualCamera { device } => {
                // YUY2 is the format most consumers of v4l2loopback accept.
                format!(
                    "videoconvert ! video/x-raw,format=YUY2 ! v4l2sink device=\"{}\" sync=false",
                    escape(device)
                )
            }
            SinkKind::Preview => "videoconvert ! autovideosink sync=false".to_string(),
        }
    }

    /// GStreamer element this sink needs at the end of its pipeline.
    pub fn factory(&self) -> &'static str {
        match self {
            SinkKind::VirtualCamera { .. } => "v4l2sink",
            SinkKind::Preview => "autovideosink",
        }
    }
}

struct OpenSink {
    pipeline: GstPipeline,
    src: gst_app::AppSrc,
    size: FrameSize,
    stride: usize,
    frame_ns: u64,
    pushed: u64,
}

/// An `appsrc`-fed GStreamer sink.
pub struct GstFrameSink {
    kind: SinkKind,
    open: Option<OpenSink>,
    close_requested: bool,
}

impl GstFrameSink {
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            open: None,
            close_requested: false,
        }
    }

    pub fn virtual_camera(device: impl Into<String>) -> Self {
        Self::new(SinkKind::VirtualCamera {
            device: device.into(),
        })
    }

    pub fn preview() -> Self {
        Self::new(SinkKind::Preview)
    }
}

impl FrameSink for GstFrameSink {
    fn name(&self) -> &str {
        self.kind.label()
    }

    fn open(&mut self, stream: &StreamInfo) -> StagefocusResult<()> {
        let fps = stream.fps.max(1);
        let info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Rgb,
            stream.size.width,
            stream.size.height,
        )
        .fps(gst::Fraction::new(fps as i32, 1))
        .build()
        .map_err(|e| StagefocusError::sink(format!("Invalid {} geometry: {e}", self.name())))?;
        let caps = info
            .to_caps()
            .map_err(|e| StagefocusError::sink(format!("Cannot build {} caps: {e}", self.name())))?;

        let launch = format!(
            "appsrc name=src is-live=true format=time ! {}",
            self.kind.launch_tail()
        );
        let mut pipeline = GstPipeline::from_launch(self.kind.label(), &launch)?;
        let src = pipeline.app_src("src")?;
        src.set_caps(Some(&caps));
        src.set_format(gst::Format::Time);

        pipeline
            .start()
            .map_err(|e| StagefocusError::sink(format!("Cannot open {}: {e}", self.name())))?;

        match &self.kind {
            SinkKind::VirtualCamera { device } => tracing::info!(
                device = %device,
                width = stream.size.width,
                height = stream.size.height,
                fps,
                "Virtual camera opened"
            ),
            SinkKind::Preview => tracing::info!("Preview window opened"),
        }

        self.open = Some(OpenSink {
            pipeline,
            src,
            size: stream.size,
            stride: info.stride().first().copied().unwrap_or(0).max(0) as usize,
            frame_ns: 1_000_000_000 / fps as u64,
            pushed: 0,
        });
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> StagefocusResult<()> {
        let name = self.kind.label();
        let Some(open) = self.open.as_mut() else {
            return Err(StagefocusError::sink(format!("{name} is not open")));
        };
        if frame.size() != open.size {
            return Err(StagefocusError::sink(format!(
                "{name} accepts {}x{} frames, got {}x{}",
                open.size.width,
                open.size.height,
                frame.width(),
                frame.height()
            )));
        }

        let row_bytes = open.size.width as usize * 3;
        let stride = open.stride.max(row_bytes);
        let data = pad_rows(frame.as_raw(), row_bytes, stride, open.size.height as usize);

        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(open.frame_ns * open.pushed));
            buf.set_duration(gst::ClockTime::from_nseconds(open.frame_ns));
        }

        open.src
            .push_buffer(buffer)
            .map_err(|e| StagefocusError::sink(format!("{name} rejected frame: {e:?}")))?;
        open.pushed += 1;
        Ok(())
    }

    fn close_requested(&mut self) -> bool {
        if self.kind != SinkKind::Preview || self.close_requested {
            return self.close_requested;
        }
        if let Some(message) = self
            .open
            .as_ref()
            .and_then(|open| open.pipeline.poll_terminal_message())
        {
            tracing::info!(%message, "Preview window closed");
            self.close_requested = true;
        }
        self.close_requested
    }

    fn close(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };
        let _ = open.src.end_of_stream();
        if let Err(e) = open.pipeline.stop(!self.close_requested) {
            tracing::warn!(sink = self.kind.label(), error = %e, "Failed to stop sink pipeline");
        }
        tracing::debug!(sink = self.kind.label(), frames = open.pushed, "Sink closed");
    }
}

impl Drop for GstFrameSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn escape(value: &str) -> String {
    value.replace('"', "\\\"")
}
