//! Pose detection.
//!
//! The detector itself is an external helper process (typically a
//! MediaPipe script). Per frame the driver writes one JSON header line
//! `{"width":W,"height":H}` followed by `W * H * 3` bytes of packed RGB,
//! and reads back one JSON line:
//!
//! ```text
//! {"landmarks":[{"x":0.41,"y":0.22,"visibility":0.98}, ...]}
//! {"landmarks":null}
//! ```

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stagefocus_common::error::{StagefocusError, StagefocusResult};
use stagefocus_common::signal::StopSignal;
use stagefocus_framing::Landmark;

use crate::frame::Frame;

/// Wait for the first reply; covers the helper loading its model.
const FIRST_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-frame reply timeout; a stalled helper ends the session.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// How often a pending wait checks the cancel signal.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Finds zero or one landmark sets in a frame.
pub trait PoseDetector: Send {
    /// `Ok(None)` means no person was found. An error is fatal to the
    /// session.
    fn detect(&mut self, frame: &Frame) -> StagefocusResult<Option<Vec<Landmark>>>;

    /// Release any resources. Must be safe to call more than once.
    fn close(&mut self) {}
}

#[derive(Debug, Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct DetectorReply {
    #[serde(default)]
    landmarks: Option<Vec<Landmark>>,
}

/// Parse one reply line from the helper.
pub fn parse_reply(line: &str) -> StagefocusResult<Option<Vec<Landmark>>> {
    let reply: DetectorReply = serde_json::from_str(line.trim()).map_err(|e| {
        StagefocusError::detector(format!("Malformed detector reply {:?}: {e}", line.trim()))
    })?;
    Ok(reply.landmarks)
}

/// One reply line, or `None` once the helper closed its output.
type ReplyLine = io::Result<Option<String>>;

/// Pump requests into the helper and its reply lines back out.
///
/// Runs detached: it ends when the request channel closes or when the
/// helper's pipes do, so a stuck helper never blocks the caller.
fn relay(
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    requests: Receiver<Vec<u8>>,
    replies: Sender<ReplyLine>,
) {
    let mut stdout = BufReader::new(stdout);
    for request in requests {
        let reply = stdin
            .write_all(&request)
            .and_then(|()| stdin.flush())
            .and_then(|()| {
                let mut line = String::new();
                let read = stdout.read_line(&mut line)?;
                Ok((read > 0).then_some(line))
            });
        let failed = !matches!(reply, Ok(Some(_)));
        if replies.send(reply).is_err() || failed {
            break;
        }
    }
}

enum Wait {
    Reply(ReplyLine),
    RelayGone,
    TimedOut,
    Cancelled,
}

fn wait_reply(
    replies: &Receiver<ReplyLine>,
    timeout: Duration,
    cancel: Option<&StopSignal>,
) -> Wait {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Wait::TimedOut;
        }
        match replies.recv_timeout((deadline - now).min(CANCEL_POLL)) {
            Ok(reply) => return Wait::Reply(reply),
            Err(RecvTimeoutError::Disconnected) => return Wait::RelayGone,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_some_and(StopSignal::is_raised) {
                    return Wait::Cancelled;
                }
            }
        }
    }
}

struct Helper {
    child: Child,
    requests: Sender<Vec<u8>>,
    replies: Receiver<ReplyLine>,
}

impl Helper {
    fn exit_description(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("detector exited ({status})"),
            _ => "detector closed its output".to_string(),
        }
    }
}

/// A pose detector running as a child process.
pub struct SubprocessDetector {
    helper: Option<Helper>,
    first_reply_timeout: Duration,
    reply_timeout: Duration,
    answered: bool,
    cancel: Option<StopSignal>,
}

impl SubprocessDetector {
    /// Spawn the helper. `command` is split on whitespace into the program
    /// and its arguments.
    pub fn spawn(command: &str) -> StagefocusResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| StagefocusError::detector("Detector command is empty"))?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                StagefocusError::detector(format!("Failed to start detector '{command}': {e}"))
            })?;

        tracing::info!(command, pid = child.id(), "Pose detector started");
        Self::from_child(child)
    }

    fn from_child(mut child: Child) -> StagefocusResult<Self> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StagefocusError::detector("Detector pipes were not captured"));
        };

        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("detector-relay".to_string())
            .spawn(move || relay(stdin, stdout, request_rx, reply_tx));
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StagefocusError::detector(format!(
                "Failed to start detector relay: {e}"
            )));
        }

        Ok(Self {
            helper: Some(Helper {
                child,
                requests: request_tx,
                replies: reply_rx,
            }),
            first_reply_timeout: FIRST_REPLY_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
            answered: false,
            cancel: None,
        })
    }

    /// Bound every reply, the first one included, by `timeout`.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.first_reply_timeout = timeout;
        self.reply_timeout = timeout;
        self
    }

    /// Abandon a pending reply as soon as `cancel` is raised.
    pub fn with_cancel(mut self, cancel: StopSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl PoseDetector for SubprocessDetector {
    fn detect(&mut self, frame: &Frame) -> StagefocusResult<Option<Vec<Landmark>>> {
        let timeout = if self.answered {
            self.reply_timeout
        } else {
            self.first_reply_timeout
        };
        let Some(helper) = self.helper.as_mut() else {
            return Err(StagefocusError::detector("Detector is closed"));
        };

        let header = serde_json::to_string(&FrameHeader {
            width: frame.width(),
            height: frame.height(),
        })?;
        let mut request = Vec::with_capacity(header.len() + 1 + frame.as_raw().len());
        request.extend_from_slice(header.as_bytes());
        request.push(b'\n');
        request.extend_from_slice(frame.as_raw());

        let wait = if helper.requests.send(request).is_ok() {
            wait_reply(&helper.replies, timeout, self.cancel.as_ref())
        } else {
            Wait::RelayGone
        };

        let result = match wait {
            Wait::Reply(Ok(Some(line))) => {
                self.answered = true;
                return parse_reply(&line);
            }
            Wait::Reply(Ok(None)) | Wait::RelayGone => {
                Err(StagefocusError::detector(helper.exit_description()))
            }
            Wait::Reply(Err(e)) => Err(StagefocusError::detector(format!(
                "Cannot exchange frame {} with detector: {e}; {}",
                frame.index(),
                helper.exit_description()
            ))),
            Wait::TimedOut => Err(StagefocusError::detector(format!(
                "No detector reply for frame {} within {timeout:?}",
                frame.index()
            ))),
            Wait::Cancelled => Err(StagefocusError::Cancelled),
        };

        // Replies can no longer be matched to frames
        self.close();
        result
    }

    fn close(&mut self) {
        let Some(Helper { mut child, .. }) = self.helper.take() else {
            return;
        };
        if let Err(e) = child.kill() {
            tracing::debug!(error = %e, "Detector already exited");
        }
        match child.wait() {
            Ok(status) => tracing::debug!(%status, "Pose detector stopped"),
            Err(e) => tracing::warn!(error = %e, "Failed to reap pose detector"),
        }
    }
}

impl Drop for SubprocessDetector {
    fn drop(&mut self) {
        self.close();
    }
}
