//! Live execution: pump the build tool's output through the classifier while
//! it runs.
//!
//! Both output channels get their own reader task; every chunk is funneled
//! through one `mpsc` channel into a single consumer loop that exclusively
//! owns the classifier state and the transcript, so no lock guards the
//! pending-line buffer. Per-channel ordering is preserved by the channel;
//! stderr is only surfaced once the build completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};

use super::{BuildSession, SessionError, Verdict};
use crate::catkin::{build_command, launch_error};
use crate::classifier::{
    first_error, normalize_newlines, strip_question_marks, suppress_width_notice, StreamClassifier,
};
use crate::sink::OutputSink;
use crate::subprocess::TokioProcessRunner;

/// Result of a live session: either a verdict, or the session was cancelled
/// and nothing more will reach the sink.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed(Verdict),
    Cancelled,
}

/// Hands out [`SinkTicket`]s; beginning a new session cancels the active one
/// and supersedes every earlier ticket from the same registry.
///
/// One registry guards one sink. No two sessions may write to the same sink
/// concurrently: the superseded session's subprocess is terminated, and any
/// of its in-flight output is dropped at the append gate instead of
/// interleaving with its successor's.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    current: Arc<AtomicU64>,
    active: Arc<std::sync::Mutex<Option<CancelHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, cancel: &CancelHandle) -> SinkTicket {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.active.lock().unwrap().replace(cancel.clone()) {
            previous.cancel();
        }
        SinkTicket {
            current: Arc::clone(&self.current),
            id,
        }
    }
}

/// Identity token a session presents before every sink append.
#[derive(Clone)]
pub struct SinkTicket {
    current: Arc<AtomicU64>,
    id: u64,
}

impl SinkTicket {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.id
    }
}

/// Cancels a live session: the subprocess is terminated, the readers drain,
/// and no further output is appended.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

pub type CancelSignal = watch::Receiver<bool>;

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamSource {
    Stdout,
    Stderr,
}

enum StreamEvent {
    Data(StreamSource, String),
    Error(StreamSource, std::io::Error),
}

/// Read a channel in arbitrary-sized chunks and forward them as they arrive.
async fn pump(
    mut reader: impl AsyncRead + Unpin + Send,
    source: StreamSource,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(StreamEvent::Data(source, chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(source, e)).await;
                break;
            }
        }
    }
}

impl BuildSession {
    /// Live mode: resolve, spawn, and stream.
    pub async fn execute_live(
        &self,
        sink: &mut dyn OutputSink,
        ticket: &SinkTicket,
        cancel: CancelSignal,
    ) -> Result<SessionOutcome, SessionError> {
        let package = self.resolve().await?;
        if ticket.is_current() {
            sink.append_text(&format!("Building {package}...\n"));
        }

        let command = build_command(&self.options, &package, &self.workdir, &self.env);
        tracing::info!("Running: {}", command.display());

        let child = TokioProcessRunner::configure_command(&command)
            .spawn()
            .map_err(|e| launch_error(&command, TokioProcessRunner::map_spawn_error(e, &command)))?;

        self.stream_build(child, sink, ticket, cancel).await
    }

    /// Drive an already-spawned build tool: pump both channels through the
    /// classifier, appending filtered stdout to the sink as it arrives.
    ///
    /// The child must have been spawned with both channels piped.
    pub async fn stream_build(
        &self,
        mut child: tokio::process::Child,
        sink: &mut dyn OutputSink,
        ticket: &SinkTicket,
        mut cancel: CancelSignal,
    ) -> Result<SessionOutcome, SessionError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Stream(std::io::Error::other("failed to capture stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SessionError::Stream(std::io::Error::other("failed to capture stderr")))?;

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        tokio::spawn(pump(stdout, StreamSource::Stdout, tx.clone()));
        tokio::spawn(pump(stderr, StreamSource::Stderr, tx));

        let mut classifier = StreamClassifier::new(self.options.markers());
        let mut transcript = String::new();
        let mut err_msg = String::new();
        let mut clear_pending = false;
        let mut cancel_open = true;
        let mut cancelled = false;

        loop {
            tokio::select! {
                // Cancellation wins over pending output, so nothing more is
                // appended once the session is superseded or torn down.
                biased;

                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            tracing::info!("Session cancelled, terminating build tool");
                            let _ = child.start_kill();
                            cancelled = true;
                            break;
                        }
                        Ok(()) => {}
                        // Handle dropped without cancelling; stop watching.
                        Err(_) => cancel_open = false,
                    }
                }
                event = rx.recv() => match event {
                    Some(StreamEvent::Data(StreamSource::Stdout, chunk)) => {
                        let text = self.process_stdout_chunk(&mut classifier, &chunk);
                        transcript.push_str(&text);
                        append_live(sink, ticket, &mut clear_pending, &text);
                    }
                    Some(StreamEvent::Data(StreamSource::Stderr, chunk)) => {
                        err_msg.push_str(&suppress_width_notice(&normalize_newlines(&chunk)));
                    }
                    Some(StreamEvent::Error(source, error)) => {
                        // Not retried; the session ends with what it has.
                        tracing::warn!("Read error on {:?}: {}", source, error);
                    }
                    None => break,
                }
            }
        }

        if cancelled {
            let _ = child.wait().await;
            return Ok(SessionOutcome::Cancelled);
        }

        let tail = self.flush_stdout(&mut classifier);
        transcript.push_str(&tail);
        append_live(sink, ticket, &mut clear_pending, &tail);

        let status = child.wait().await.map_err(SessionError::Stream)?;
        tracing::debug!("Build tool exited with {:?}", status);

        let first_error = first_error(&transcript);
        let verdict = Verdict {
            success: first_error.is_none(),
            filtered_output: transcript,
            stderr: err_msg,
            first_error,
        };

        if ticket.is_current() {
            self.render_tail(&verdict, sink);
        }
        Ok(SessionOutcome::Completed(verdict))
    }

    fn process_stdout_chunk(&self, classifier: &mut StreamClassifier, chunk: &str) -> String {
        let mut text = normalize_newlines(chunk);
        if self.options.trim_output {
            text = classifier.push_chunk(&text);
        }
        if self.options.strip_question_marks {
            text = strip_question_marks(&text, "'");
        }
        suppress_width_notice(&text)
    }

    /// Classify whatever fragment is still pending once stdout hits EOF.
    fn flush_stdout(&self, classifier: &mut StreamClassifier) -> String {
        if !self.options.trim_output {
            return String::new();
        }
        let mut text = classifier.finish();
        if self.options.strip_question_marks {
            text = strip_question_marks(&text, "'");
        }
        suppress_width_notice(&text)
    }
}

/// Append to the sink iff this session is still the sink's current writer,
/// replaying the in-place overwrite for `[build N of M]` progress lines.
fn append_live(sink: &mut dyn OutputSink, ticket: &SinkTicket, clear_pending: &mut bool, text: &str) {
    if text.is_empty() || !ticket.is_current() {
        return;
    }
    if *clear_pending {
        sink.clear_last_line();
        *clear_pending = false;
    }
    sink.append_text(text);
    if text.contains("[build") {
        *clear_pending = true;
    }
}
