use anyhow::{anyhow, Context};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use catkin_sift::config::{BuildOptions, Settings};
use catkin_sift::session::{BuildSession, CancelHandle, SessionOutcome, SessionRegistry};
use catkin_sift::sink::ConsoleSink;
use catkin_sift::subprocess::SubprocessManager;

/// Wrapper for catkin build to simplify the build process
#[derive(Parser)]
#[command(name = "catkin-sift")]
#[command(about = "Wrap catkin build, trim the noise, and reprint the first real error", long_about = None)]
struct Cli {
    /// Path to the ROS package to build; may be a subdirectory or file path
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Also build the dependencies of the package
    #[arg(short = 'd', long = "build_deps", default_value_t = false,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    build_deps: bool,

    /// Keep text color in the output
    #[arg(short = 'c', long = "color", default_value_t = false,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    color: bool,

    /// Keep catkin's live status lines (output is withheld until completion)
    #[arg(short = 's', long = "keep_status", default_value_t = false,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    keep_status: bool,

    /// Trim the build output down to the per-package banner regions
    #[arg(short = 't', long = "trim_output", default_value_t = true,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    trim_output: bool,

    /// Remove question marks from the output (catkin emits ? in place of bold text)
    #[arg(short = 'q', long = "remove_q", default_value_t = true,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    remove_q: bool,

    /// Repeat the first error encountered at the end of the build
    #[arg(short = 'r', long = "repeat_err", default_value_t = true,
          num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set)]
    repeat_err: bool,

    /// Run catkin run_tests instead of catkin build
    #[arg(long)]
    run_tests: bool,

    /// Build with -DCMAKE_BUILD_TYPE=Debug
    #[arg(long)]
    debug: bool,

    /// Stream filtered output while the build runs instead of after it
    #[arg(short = 'l', long)]
    live: bool,

    /// Settings file for live mode (default: the per-user settings file)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Environment override for the build tool, expanded against the
    /// current environment (repeatable)
    #[arg(long, value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Extra arguments passed through to catkin, shell-quoted
    #[arg(long, value_name = "ARGS")]
    catkin_args: Option<String>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(success) => std::process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            error!("Fatal error: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let workdir = resolve_workdir(cli.path.clone())?;
    debug!("Working directory: {}", workdir.display());

    let mut env_overrides = parse_env_pairs(&cli.env)?;
    let mut options = BuildOptions::default();

    if cli.live {
        // Live mode reads the persisted settings surface, like an embedding
        // host would; batch mode is driven by the flags alone.
        if let Some(path) = cli.settings.clone().or_else(Settings::default_path) {
            let settings = Settings::load(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?;
            settings.apply_to(&mut options);
            for (key, value) in settings.env {
                env_overrides.entry(key).or_insert(value);
            }
        }
    } else {
        options.color = cli.color;
        options.build_deps = cli.build_deps;
        options.quiet_status = !cli.keep_status;
        options.trim_output = cli.trim_output;
        options.strip_question_marks = cli.remove_q;
        options.repeat_first_error = cli.repeat_err;
    }
    options.run_tests = cli.run_tests;
    options.debug_build = cli.debug;
    if let Some(args) = &cli.catkin_args {
        options.extra_args = shell_words::split(args)
            .map_err(|e| anyhow!("invalid --catkin-args {args:?}: {e}"))?;
    }

    let session = BuildSession::new(
        options,
        SubprocessManager::production(),
        workdir,
        &env_overrides,
    );
    let mut sink = ConsoleSink::new();

    let success = if cli.live {
        let registry = SessionRegistry::new();
        let (cancel, signal) = CancelHandle::new();
        let ticket = registry.begin(&cancel);

        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        match session.execute_live(&mut sink, &ticket, signal).await? {
            SessionOutcome::Completed(verdict) => verdict.success,
            SessionOutcome::Cancelled => false,
        }
    } else {
        session.execute(&mut sink).await?.success
    };

    Ok(success)
}

/// A file path builds the package containing the file.
fn resolve_workdir(path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if path.is_file() {
        Ok(path.parent().unwrap_or(Path::new(".")).to_path_buf())
    } else {
        Ok(path)
    }
}

fn parse_env_pairs(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("invalid --env {pair:?}, expected KEY=VALUE"))
        })
        .collect()
}
