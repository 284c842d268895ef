//! Catkin-specific plumbing: the package resolution query and build command
//! construction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::BuildOptions;
use crate::session::SessionError;
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder, ProcessError, ProcessRunner};

/// Read-only queries against the catkin workspace.
#[async_trait]
pub trait CatkinRunner: Send + Sync {
    /// Name the package at `workdir` via `catkin list --this`.
    ///
    /// Fails before anything is built: a query error, an empty answer, or an
    /// ambiguous answer all abort the session.
    async fn resolve_target_package(&self, workdir: &Path) -> Result<String, SessionError>;
}

pub struct CatkinRunnerImpl {
    runner: Arc<dyn ProcessRunner>,
}

impl CatkinRunnerImpl {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CatkinRunner for CatkinRunnerImpl {
    async fn resolve_target_package(&self, workdir: &Path) -> Result<String, SessionError> {
        let command = ProcessCommandBuilder::new("catkin")
            .args(["list", "--this"])
            .current_dir(workdir)
            .build();

        let output = self
            .runner
            .run(command.clone())
            .await
            .map_err(|e| launch_error(&command, e))?;

        if !output.stderr.trim().is_empty() {
            return Err(SessionError::Resolution {
                path: workdir.display().to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }

        // `catkin list` answers with one `- <name>` bullet per package.
        let packages: Vec<&str> = output
            .stdout
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        match packages.as_slice() {
            [name] => {
                tracing::debug!("Resolved package '{}' at {}", name, workdir.display());
                Ok(name.to_string())
            }
            [] => Err(SessionError::Resolution {
                path: workdir.display().to_string(),
                reason: "catkin list returned no package".to_string(),
            }),
            many => Err(SessionError::Resolution {
                path: workdir.display().to_string(),
                reason: format!("ambiguous path, {} packages found", many.len()),
            }),
        }
    }
}

/// Construct the build command line from configuration. Deterministic, no
/// side effects.
pub fn build_command(
    options: &BuildOptions,
    package: &str,
    workdir: &Path,
    env: &HashMap<String, String>,
) -> ProcessCommand {
    let verb = if options.run_tests { "run_tests" } else { "build" };

    let mut builder = ProcessCommandBuilder::new("catkin")
        .arg(verb)
        .arg(package)
        .arg(if options.color { "--force-color" } else { "--no-color" })
        .current_dir(workdir)
        .envs(env);

    if !options.build_deps {
        builder = builder.arg("--no-deps");
    }
    if options.quiet_status {
        builder = builder.arg("--no-status");
    }
    if options.debug_build {
        builder = builder.args(["--cmake-args", "-DCMAKE_BUILD_TYPE=Debug"]);
    }
    builder = builder.args(&options.extra_args);

    builder.build()
}

pub(crate) fn launch_error(command: &ProcessCommand, source: ProcessError) -> SessionError {
    let search_path = match &source {
        ProcessError::CommandNotFound { search_path, .. } => search_path.clone(),
        _ => std::env::var("PATH").unwrap_or_else(|_| "<unset>".to_string()),
    };
    SessionError::Launch {
        command: command.display(),
        search_path,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;
    use std::path::PathBuf;

    fn options() -> BuildOptions {
        BuildOptions::default()
    }

    fn args_of(command: &ProcessCommand) -> Vec<&str> {
        command.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn default_command_line() {
        let command = build_command(&options(), "pkg_a", Path::new("/ws/src/pkg_a"), &HashMap::new());
        assert_eq!(command.program, "catkin");
        assert_eq!(
            args_of(&command),
            ["build", "pkg_a", "--no-color", "--no-deps", "--no-status"]
        );
        assert_eq!(command.working_dir, Some(PathBuf::from("/ws/src/pkg_a")));
    }

    #[test]
    fn color_and_deps_and_status_toggles() {
        let opts = BuildOptions {
            color: true,
            build_deps: true,
            quiet_status: false,
            ..options()
        };
        let command = build_command(&opts, "pkg_a", Path::new("."), &HashMap::new());
        assert_eq!(args_of(&command), ["build", "pkg_a", "--force-color"]);
    }

    #[test]
    fn run_tests_switches_the_verb() {
        let opts = BuildOptions {
            run_tests: true,
            ..options()
        };
        let command = build_command(&opts, "pkg_a", Path::new("."), &HashMap::new());
        assert_eq!(command.args[0], "run_tests");
    }

    #[test]
    fn debug_appends_cmake_build_type() {
        let opts = BuildOptions {
            debug_build: true,
            ..options()
        };
        let command = build_command(&opts, "pkg_a", Path::new("."), &HashMap::new());
        assert_eq!(
            &args_of(&command)[5..],
            ["--cmake-args", "-DCMAKE_BUILD_TYPE=Debug"]
        );
    }

    #[test]
    fn extra_args_are_appended_last() {
        let opts = BuildOptions {
            extra_args: vec!["-j4".to_string()],
            ..options()
        };
        let command = build_command(&opts, "pkg_a", Path::new("."), &HashMap::new());
        assert_eq!(args_of(&command).last(), Some(&"-j4"));
    }

    #[tokio::test]
    async fn resolution_parses_single_bullet() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("catkin")
            .with_args(|args| args == ["list", "--this"])
            .returns_stdout("- turtle_driver\n")
            .finish();

        let runner = CatkinRunnerImpl::new(Arc::new(mock));
        let name = runner
            .resolve_target_package(Path::new("/ws/src/turtle_driver"))
            .await
            .unwrap();
        assert_eq!(name, "turtle_driver");
    }

    #[tokio::test]
    async fn empty_answer_is_a_resolution_error() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("catkin").returns_stdout("").finish();

        let runner = CatkinRunnerImpl::new(Arc::new(mock));
        let err = runner
            .resolve_target_package(Path::new("/no/such/pkg"))
            .await
            .unwrap_err();
        match err {
            SessionError::Resolution { path, .. } => assert_eq!(path, "/no/such/pkg"),
            other => panic!("expected Resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_stderr_is_a_resolution_error() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("catkin")
            .returns_stderr("WARNING: no workspace found\n")
            .finish();

        let runner = CatkinRunnerImpl::new(Arc::new(mock));
        let err = runner
            .resolve_target_package(Path::new("/ws"))
            .await
            .unwrap_err();
        match err {
            SessionError::Resolution { reason, .. } => {
                assert!(reason.contains("no workspace found"));
            }
            other => panic!("expected Resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ambiguous_answer_is_a_resolution_error() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("catkin")
            .returns_stdout("- pkg_a\n- pkg_b\n")
            .finish();

        let runner = CatkinRunnerImpl::new(Arc::new(mock));
        let err = runner.resolve_target_package(Path::new("/ws")).await.unwrap_err();
        match err {
            SessionError::Resolution { reason, .. } => assert!(reason.contains("ambiguous")),
            other => panic!("expected Resolution, got {other:?}"),
        }
    }
}
