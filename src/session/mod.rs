//! One end-to-end build invocation.
//!
//! A [`BuildSession`] resolves the target package, constructs the catkin
//! command line, runs it, classifies the output, and renders a [`Verdict`] to
//! an [`OutputSink`]. The batch path ([`BuildSession::execute`]) waits for
//! completion and classifies once; the live path
//! ([`BuildSession::execute_live`], in [`stream`]) pumps chunks through the
//! classifier while the build runs.

mod stream;

pub use stream::{CancelHandle, CancelSignal, SessionOutcome, SessionRegistry, SinkTicket};

use std::collections::HashMap;
use std::path::PathBuf;

use crate::catkin::{build_command, launch_error, CatkinRunner, CatkinRunnerImpl};
use crate::classifier::{first_error, strip_question_marks, suppress_width_notice, StreamClassifier};
use crate::config::{expand_env, BuildOptions};
use crate::sink::OutputSink;
use crate::subprocess::{ProcessError, ProcessRunner as _, SubprocessManager};

/// Fatal session failures. A build that merely fails is not one of these; it
/// is a [`Verdict`] with `success == false`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The resolution query errored or named no single package. Nothing was
    /// launched.
    #[error("no package found at {path} ({reason})")]
    Resolution { path: String, reason: String },

    /// The build tool could not be started.
    #[error("failed to launch build tool: {source}\n[cmd:  {command}]\n[path: {search_path}]")]
    Launch {
        command: String,
        search_path: String,
        #[source]
        source: ProcessError,
    },

    /// An output channel died mid-session; the transcript is partial.
    #[error("stream read failed: {0}")]
    Stream(#[from] std::io::Error),
}

/// Final result of one build session.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub success: bool,
    /// The trimmed and cleaned stdout transcript.
    pub filtered_output: String,
    /// Captured stderr, surfaced ahead of the final verdict line.
    pub stderr: String,
    /// The isolated first error block, pre-formatted with its banner and
    /// divider. `None` when the build was error-free.
    pub first_error: Option<String>,
}

pub struct BuildSession {
    options: BuildOptions,
    subprocess: SubprocessManager,
    workdir: PathBuf,
    env: HashMap<String, String>,
}

impl BuildSession {
    /// Environment override values are expanded against the process
    /// environment once, at construction.
    pub fn new(
        options: BuildOptions,
        subprocess: SubprocessManager,
        workdir: PathBuf,
        env_overrides: &HashMap<String, String>,
    ) -> Self {
        Self {
            options,
            subprocess,
            workdir,
            env: expand_env(env_overrides),
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Batch mode: run the build to completion, then classify the complete
    /// captured output in one pass.
    pub async fn execute(&self, sink: &mut dyn OutputSink) -> Result<Verdict, SessionError> {
        let package = self.resolve().await?;
        sink.append_text(&format!("Building {package}...\n"));

        let command = build_command(&self.options, &package, &self.workdir, &self.env);
        tracing::info!("Running: {}", command.display());

        let output = self
            .subprocess
            .runner()
            .run(command.clone())
            .await
            .map_err(|e| launch_error(&command, e))?;
        tracing::debug!("Build tool exited with {:?}", output.status);

        let verdict = self.classify(&output.stdout, &output.stderr);
        self.render(&verdict, sink);
        Ok(verdict)
    }

    /// Resolve the target package. Aborts the session before anything is
    /// launched if the query fails.
    pub(crate) async fn resolve(&self) -> Result<String, SessionError> {
        let catkin = CatkinRunnerImpl::new(self.subprocess.runner());
        catkin.resolve_target_package(&self.workdir).await
    }

    /// One-pass classification of a complete transcript.
    pub(crate) fn classify(&self, stdout: &str, stderr: &str) -> Verdict {
        let mut text = stdout.to_string();
        if self.options.strip_question_marks {
            text = strip_question_marks(&text, "");
        }
        if self.options.trim_output {
            text = StreamClassifier::new(self.options.markers()).filter(&text);
        }

        let first_error = first_error(&text);
        Verdict {
            success: first_error.is_none(),
            filtered_output: text,
            stderr: suppress_width_notice(stderr),
            first_error,
        }
    }

    /// Append the transcript and the final verdict lines to the sink.
    pub fn render(&self, verdict: &Verdict, sink: &mut dyn OutputSink) {
        sink.append_text(&verdict.filtered_output);
        self.render_tail(verdict, sink);
    }

    /// Append only what follows the transcript: captured stderr, the repeated
    /// first error, and exactly one of the two final verdict lines. The live
    /// path uses this after streaming the transcript itself.
    pub(crate) fn render_tail(&self, verdict: &Verdict, sink: &mut dyn OutputSink) {
        if !verdict.stderr.is_empty() {
            sink.append_text(&verdict.stderr);
        }
        if verdict.success {
            sink.append_text("\nSUCCESSFUL BUILD\n");
        } else {
            if self.options.repeat_first_error {
                if let Some(block) = &verdict.first_error {
                    sink.append_text(block);
                }
            }
            sink.append_text("\nFAILED BUILD\n");
        }
    }
}
