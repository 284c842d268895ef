//! Build options, banner markers, and the persisted settings surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Per-invocation behavior toggles, constructed once and never mutated.
///
/// The defaults match the standalone wrapper: trim the transcript, strip the
/// question marks catkin emits in place of bold-text escapes, and repeat the
/// first error after a failed build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Keep ANSI color in the output and match the color-coded banner markers.
    pub color: bool,
    /// Build the package's dependencies as well (omits `--no-deps`).
    pub build_deps: bool,
    /// Suppress catkin's live status lines (`--no-status`).
    pub quiet_status: bool,
    /// Restrict the transcript to the start/finish banner regions.
    pub trim_output: bool,
    /// Replace literal `?` characters in the output.
    pub strip_question_marks: bool,
    /// Reprint the first error block after a failed build.
    pub repeat_first_error: bool,
    /// Run `catkin run_tests` instead of `catkin build`.
    pub run_tests: bool,
    /// Build with `-DCMAKE_BUILD_TYPE=Debug`.
    pub debug_build: bool,
    /// Extra arguments passed through to catkin verbatim, after all flags.
    pub extra_args: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            color: false,
            build_deps: false,
            quiet_status: true,
            trim_output: true,
            strip_question_marks: true,
            repeat_first_error: true,
            run_tests: false,
            debug_build: false,
            extra_args: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Marker set matching this invocation's color mode.
    pub fn markers(&self) -> Markers {
        Markers::for_color(self.color)
    }
}

/// The literal banner strings that delimit a package's region of interest in
/// catkin's output.
///
/// These are tied to catkin's output formatting, so they live here as plain
/// data rather than inside the filtering algorithm. `ansi()` matches the
/// color-coded variant emitted under `--force-color`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub start: &'static str,
    pub finished: &'static str,
    pub failed: &'static str,
}

impl Markers {
    /// Markers for `--no-color` output.
    pub fn plain() -> Self {
        Self {
            start: "Starting >>> ",
            finished: "Finished <<< ",
            failed: "Failed <<< ",
        }
    }

    /// Markers for `--force-color` output.
    pub fn ansi() -> Self {
        Self {
            start: "Starting  \x1b[1m\x1b[32m>>>\x1b[0m ",
            finished: "\x1b[1m\x1b[30mFinished\x1b[0m  \x1b[32m<<<\x1b[0m ",
            failed: "\x1b[1m\x1b[31mFailed\x1b[0m    \x1b[31m<<<\x1b[0m ",
        }
    }

    pub fn for_color(color: bool) -> Self {
        if color {
            Self::ansi()
        } else {
            Self::plain()
        }
    }
}

/// The persisted settings record used by embedding hosts.
///
/// Field names mirror the keys of the original settings file, so an existing
/// `settings.toml` keeps working:
///
/// ```toml
/// color = false
/// status-updates = false
/// trim-output = true
/// replace-q = true
/// repeat-error = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub color: bool,
    pub status_updates: bool,
    pub trim_output: bool,
    pub replace_q: bool,
    pub repeat_error: bool,
    /// Extra arguments appended to every catkin invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Per-invocation environment overrides, values subject to `$VAR` expansion.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color: false,
            status_updates: false,
            trim_output: true,
            replace_q: true,
            repeat_error: true,
            extra_args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl Settings {
    /// Default on-disk location of the settings file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("catkin-sift").join("settings.toml"))
    }

    /// Load settings from `path`, falling back to defaults if the file does
    /// not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&raw)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply these settings on top of `options`.
    pub fn apply_to(&self, options: &mut BuildOptions) {
        options.color = self.color;
        options.quiet_status = !self.status_updates;
        options.trim_output = self.trim_output;
        options.strip_question_marks = self.replace_q;
        options.repeat_first_error = self.repeat_error;
        options.extra_args = self.extra_args.clone();
    }
}

/// Expand `${VAR}` and `$VAR` references in `value` against `vars`.
///
/// Pure string manipulation; unknown variables are left untouched.
pub fn expand_value(value: &str, vars: &HashMap<String, String>) -> String {
    let mut result = value.to_string();
    for (key, val) in vars {
        result = result.replace(&format!("${{{}}}", key), val);
        result = result.replace(&format!("${}", key), val);
    }
    result
}

/// Expand every value of an environment-override map against the current
/// process environment.
pub fn expand_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let process_env: HashMap<String, String> = std::env::vars().collect();
    overrides
        .iter()
        .map(|(k, v)| (k.clone(), expand_value(v, &process_env)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_documented_defaults() {
        let opts = BuildOptions::default();
        assert!(!opts.color);
        assert!(!opts.build_deps);
        assert!(opts.quiet_status);
        assert!(opts.trim_output);
        assert!(opts.strip_question_marks);
        assert!(opts.repeat_first_error);
        assert!(!opts.run_tests);
        assert!(!opts.debug_build);
        assert!(opts.extra_args.is_empty());
    }

    #[test]
    fn markers_follow_color_mode() {
        assert_eq!(Markers::for_color(false), Markers::plain());
        assert_eq!(Markers::for_color(true), Markers::ansi());
        assert!(Markers::ansi().start.contains("\x1b[32m"));
    }

    #[test]
    fn settings_parse_kebab_case_keys() {
        let settings: Settings = toml::from_str(
            r#"
            color = true
            status-updates = true
            trim-output = false
            replace-q = false
            repeat-error = false
            "#,
        )
        .unwrap();
        assert!(settings.color);
        assert!(settings.status_updates);
        assert!(!settings.trim_output);
        assert!(!settings.replace_q);
        assert!(!settings.repeat_error);
    }

    #[test]
    fn settings_apply_inverts_status_updates() {
        let settings = Settings {
            status_updates: true,
            ..Settings::default()
        };
        let mut opts = BuildOptions::default();
        settings.apply_to(&mut opts);
        assert!(!opts.quiet_status);
    }

    #[test]
    fn settings_round_trip() {
        let mut settings = Settings::default();
        settings.env.insert("ROS_HOME".into(), "$HOME/.ros".into());
        let raw = toml::to_string(&settings).unwrap();
        let back: Settings = toml::from_str(&raw).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn load_missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn expand_value_handles_both_reference_forms() {
        let mut vars = HashMap::new();
        vars.insert("HOME".to_string(), "/home/turtle".to_string());
        assert_eq!(
            expand_value("${HOME}/.ros", &vars),
            "/home/turtle/.ros"
        );
        assert_eq!(expand_value("$HOME/.ros", &vars), "/home/turtle/.ros");
        assert_eq!(expand_value("$UNSET/x", &vars), "$UNSET/x");
    }
}
