use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use stagefocus_capture_engine::{
    CaptureSource, Frame, FrameSink, FramingSession, PoseDetector, SessionConfig, SessionState,
    StopReason, StreamInfo, SubprocessDetector,
};
use stagefocus_common::{
    SettingKey, SettingValue, SettingsStore, StagefocusError, StagefocusResult, StopSignal,
};
use stagefocus_framing::{clamp_to_frame, target_box, FrameSize, Landmark};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

fn gradient_frame(index: u64) -> Frame {
    let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| Rgb([x as u8, y as u8, index as u8]));
    Frame::new(index, image)
}

enum Read {
    Frame(Frame),
    Fail,
}

struct FakeSource {
    fps: u32,
    fail_open: bool,
    reads: VecDeque<Read>,
    journal: Journal,
}

impl FakeSource {
    fn with_frames(count: u64, fps: u32, journal: &Journal) -> Self {
        Self {
            fps,
            fail_open: false,
            reads: (0..count).map(|i| Read::Frame(gradient_frame(i))).collect(),
            journal: journal.clone(),
        }
    }
}

impl CaptureSource for FakeSource {
    fn open(&mut self) -> StagefocusResult<StreamInfo> {
        if self.fail_open {
            return Err(StagefocusError::capture("no such device"));
        }
        note(&self.journal, "source:open");
        Ok(StreamInfo {
            size: FrameSize::new(WIDTH, HEIGHT),
            fps: self.fps,
        })
    }

    fn read_frame(&mut self) -> StagefocusResult<Option<Frame>> {
        match self.reads.pop_front() {
            Some(Read::Frame(frame)) => Ok(Some(frame)),
            Some(Read::Fail) => Err(StagefocusError::capture("device unplugged")),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        note(&self.journal, "source:close");
    }
}

type Reply = StagefocusResult<Option<Vec<Landmark>>>;

struct ScriptedDetector {
    replies: VecDeque<Reply>,
    first_pixels: Arc<Mutex<Vec<[u8; 3]>>>,
    journal: Journal,
}

impl ScriptedDetector {
    fn new(replies: Vec<Reply>, journal: &Journal) -> Self {
        Self {
            replies: replies.into(),
            first_pixels: Arc::default(),
            journal: journal.clone(),
        }
    }

    fn nobody(journal: &Journal) -> Self {
        Self::new(Vec::new(), journal)
    }
}

impl PoseDetector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> StagefocusResult<Option<Vec<Landmark>>> {
        self.first_pixels
            .lock()
            .unwrap()
            .push(frame.image().get_pixel(0, 0).0);
        self.replies.pop_front().unwrap_or(Ok(None))
    }

    fn close(&mut self) {
        note(&self.journal, "detector:close");
    }
}

/// Always sees `person()`, and retunes smoothing when asked for frame
/// `retune_at`.
struct RetuningDetector {
    settings: Arc<SettingsStore>,
    retune_at: u64,
}

impl PoseDetector for RetuningDetector {
    fn detect(&mut self, frame: &Frame) -> StagefocusResult<Option<Vec<Landmark>>> {
        if frame.index() == self.retune_at {
            self.settings
                .set(SettingKey::SmoothingFactor, SettingValue::Float(1.0))?;
        }
        Ok(Some(person()))
    }
}

#[derive(Default)]
struct SinkLog {
    opened: Option<StreamInfo>,
    sizes: Vec<FrameSize>,
    images: Vec<RgbImage>,
}

struct RecordingSink {
    name: &'static str,
    log: Arc<Mutex<SinkLog>>,
    close_after: Option<usize>,
    fail_on: Option<usize>,
    journal: Journal,
}

impl RecordingSink {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            log: Arc::default(),
            close_after: None,
            fail_on: None,
            journal: journal.clone(),
        }
    }
}

impl FrameSink for RecordingSink {
    fn name(&self) -> &str {
        self.name
    }

    fn open(&mut self, stream: &StreamInfo) -> StagefocusResult<()> {
        self.log.lock().unwrap().opened = Some(*stream);
        note(&self.journal, format!("{}:open", self.name));
        Ok(())
    }

    fn send(&mut self, frame: &Frame) -> StagefocusResult<()> {
        let mut log = self.log.lock().unwrap();
        if self.fail_on == Some(log.sizes.len()) {
            return Err(StagefocusError::sink("device busy"));
        }
        log.sizes.push(frame.size());
        log.images.push(frame.image().clone());
        Ok(())
    }

    fn close_requested(&mut self) -> bool {
        self.close_after
            .is_some_and(|n| self.log.lock().unwrap().sizes.len() >= n)
    }

    fn close(&mut self) {
        note(&self.journal, format!("{}:close", self.name));
    }
}

fn settings_store(dir: &tempfile::TempDir) -> Arc<SettingsStore> {
    Arc::new(SettingsStore::new(dir.path().join("config.json")))
}

fn unpaced() -> SessionConfig {
    SessionConfig {
        mirror: false,
        pace: false,
    }
}

fn person() -> Vec<Landmark> {
    vec![
        Landmark::new(0.25, 0.25, 0.9),
        Landmark::new(0.75, 0.75, 0.9),
    ]
}

fn assert_released(journal: &Journal) {
    let entries = journal.lock().unwrap();
    for expected in ["source:close", "detector:close", "camera:close"] {
        assert!(
            entries.iter().any(|e| e == expected),
            "missing {expected} in {entries:?}"
        );
    }
}

#[test]
fn zero_fps_source_streams_at_default_rate() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let sink = RecordingSink::new("camera", &journal);
    let log = sink.log.clone();
    let stop = StopSignal::new();

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(FakeSource::with_frames(3, 0, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(sink));

    let report = session.run().unwrap();
    assert_eq!(report.stream.fps, 0);
    assert_eq!(report.effective_fps, 30);
    assert_eq!(log.lock().unwrap().opened.map(|s| s.fps), Some(30));

    assert_eq!(report.stop_reason, StopReason::SourceExhausted);
    assert_eq!(report.frames_read, 3);
    assert_eq!(report.frames_emitted, 3);
    assert_eq!(report.frames_fallback, 3);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(stop.is_raised());
    assert_released(&journal);
}

#[test]
fn emitted_frames_keep_source_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let camera = RecordingSink::new("camera", &journal);
    let preview = RecordingSink::new("preview", &journal);
    let camera_log = camera.log.clone();
    let preview_log = preview.log.clone();

    let replies = (0..5).map(|_| Ok(Some(person()))).collect();
    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(5, 30, &journal)),
        Box::new(ScriptedDetector::new(replies, &journal)),
    )
    .with_sink(Box::new(camera))
    .with_sink(Box::new(preview));

    let report = session.run().unwrap();
    assert_eq!(report.frames_emitted, 5);
    assert_eq!(report.frames_fallback, 0);
    for log in [camera_log, preview_log] {
        let log = log.lock().unwrap();
        assert_eq!(log.sizes.len(), 5);
        assert!(log.sizes.iter().all(|s| *s == FrameSize::new(WIDTH, HEIGHT)));
    }
}

#[test]
fn open_failure_is_fatal_and_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();
    let mut source = FakeSource::with_frames(3, 30, &journal);
    source.fail_open = true;

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(source),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    let err = session.run().unwrap_err();
    assert!(matches!(err, StagefocusError::Capture { .. }));
    assert!(stop.is_raised());
    assert_eq!(session.state(), SessionState::Stopped);
    assert_released(&journal);
    assert!(!journal.lock().unwrap().iter().any(|e| e == "camera:open"));
}

#[test]
fn read_failure_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();
    let mut source = FakeSource::with_frames(2, 30, &journal);
    source.reads.push_back(Read::Fail);
    source.reads.push_back(Read::Frame(gradient_frame(9)));

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(source),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::SourceExhausted);
    assert_eq!(report.frames_read, 2);
    assert!(stop.is_raised());
    assert_released(&journal);
}

#[test]
fn degenerate_crop_is_skipped_and_session_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_store(&dir);
    settings
        .set(SettingKey::SmoothingFactor, SettingValue::Float(1.0))
        .unwrap();

    let journal = Journal::default();
    let sink = RecordingSink::new("camera", &journal);
    let log = sink.log.clone();
    let single_point = vec![Landmark::new(0.5, 0.5, 1.0)];

    let mut session = FramingSession::new(
        unpaced(),
        settings,
        StopSignal::new(),
        Box::new(FakeSource::with_frames(3, 30, &journal)),
        Box::new(ScriptedDetector::new(
            vec![Ok(Some(single_point)), Ok(None), Ok(Some(person()))],
            &journal,
        )),
    )
    .with_sink(Box::new(sink));

    let report = session.run().unwrap();
    assert_eq!(report.frames_read, 3);
    assert_eq!(report.frames_skipped, 1);
    assert_eq!(report.frames_emitted, 2);
    assert_eq!(report.frames_fallback, 1);
    assert_eq!(log.lock().unwrap().sizes.len(), 2);
}

#[test]
fn closing_preview_stops_session() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();
    let mut preview = RecordingSink::new("camera", &journal);
    preview.close_after = Some(2);

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(FakeSource::with_frames(10, 30, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(preview));

    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::PreviewClosed);
    assert_eq!(report.frames_emitted, 2);
    assert!(stop.is_raised());
    assert_released(&journal);
}

#[test]
fn raised_signal_cancels_before_first_frame() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();
    stop.raise();

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop,
        Box::new(FakeSource::with_frames(10, 30, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.frames_read, 0);
    assert_released(&journal);
}

#[test]
fn detector_failure_stops_session() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(5, 30, &journal)),
        Box::new(ScriptedDetector::new(
            vec![Ok(None), Err(StagefocusError::detector("helper crashed"))],
            &journal,
        )),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::DetectorFailed);
    assert_eq!(report.frames_read, 2);
    assert_eq!(report.frames_emitted, 1);
    assert_released(&journal);
}

#[test]
fn sink_failure_stops_session() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let mut sink = RecordingSink::new("camera", &journal);
    sink.fail_on = Some(1);

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(5, 30, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(sink));

    let report = session.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::SinkFailed);
    assert_eq!(report.frames_emitted, 1);
    assert_released(&journal);
}

#[test]
fn session_without_sinks_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(FakeSource::with_frames(1, 30, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    );

    let err = session.run().unwrap_err();
    assert!(matches!(err, StagefocusError::Unsupported { .. }));
    assert!(stop.is_raised());
    assert!(journal.lock().unwrap().is_empty());
}

#[test]
fn mirroring_happens_before_detection() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let detector = ScriptedDetector::nobody(&journal);
    let pixels = detector.first_pixels.clone();

    let mut session = FramingSession::new(
        SessionConfig {
            mirror: true,
            pace: false,
        },
        settings_store(&dir),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(1, 30, &journal)),
        Box::new(detector),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    session.run().unwrap();
    // Top-left pixel of the mirrored frame is the source's top-right
    assert_eq!(pixels.lock().unwrap().as_slice(), &[[(WIDTH - 1) as u8, 0, 0]]);
}

#[test]
fn session_runs_only_once() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(1, 30, &journal)),
        Box::new(ScriptedDetector::nobody(&journal)),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));

    session.run().unwrap();
    assert!(session.run().is_err());
}

#[test]
fn settings_changed_mid_session_apply_to_the_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_store(&dir);
    let journal = Journal::default();
    let sink = RecordingSink::new("camera", &journal);
    let log = sink.log.clone();

    let mut session = FramingSession::new(
        unpaced(),
        Arc::clone(&settings),
        StopSignal::new(),
        Box::new(FakeSource::with_frames(6, 30, &journal)),
        Box::new(RetuningDetector {
            settings: Arc::clone(&settings),
            retune_at: 3,
        }),
    )
    .with_sink(Box::new(sink));

    let report = session.run().unwrap();
    assert_eq!(report.frames_emitted, 6);

    let size = FrameSize::new(WIDTH, HEIGHT);
    let padding = settings.snapshot().padding_factor;
    let target = clamp_to_frame(&target_box(Some(&person()), size, padding), size).unwrap();
    let on_target = |index: u64| {
        gradient_frame(index)
            .crop_resize(target, size)
            .unwrap()
            .image()
            .clone()
    };

    let log = log.lock().unwrap();
    // Default smoothing is still easing in from the full frame
    assert_ne!(log.images[2], on_target(2));
    // Full smoothing takes effect on the very frame it was set
    for index in 3..6 {
        assert_eq!(log.images[index as usize], on_target(index), "frame {index}");
    }
}

#[cfg(unix)]
#[test]
fn stuck_detector_does_not_hold_up_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let stop = StopSignal::new();
    // Never reads a frame and never answers
    let detector = SubprocessDetector::spawn("sleep 30")
        .unwrap()
        .with_cancel(stop.clone());

    let mut session = FramingSession::new(
        unpaced(),
        settings_store(&dir),
        stop.clone(),
        Box::new(FakeSource::with_frames(100, 30, &journal)),
        Box::new(detector),
    )
    .with_sink(Box::new(RecordingSink::new("camera", &journal)));
    let driver = std::thread::spawn(move || session.run());

    std::thread::sleep(Duration::from_millis(200));
    let raised_at = Instant::now();
    stop.raise();
    let report = driver.join().unwrap().unwrap();

    assert!(raised_at.elapsed() < Duration::from_secs(3));
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.frames_emitted, 0);
    let entries = journal.lock().unwrap();
    assert!(entries.iter().any(|e| e == "source:close"));
    assert!(entries.iter().any(|e| e == "camera:close"));
}
