//! # catkin-sift
//!
//! A thin wrapper around `catkin build` that captures the build output,
//! trims it down to the per-package start/finish banners, and reprints the
//! first real compiler or linker error after the build completes.
//!
//! ## Usage
//!
//! ```bash
//! catkin-sift --path src/my_package [--live] [--trim_output false]
//! ```
//!
//! ## Modules
//!
//! - `catkin` - Resolution query and build command construction for catkin
//! - `classifier` - Chunk-tolerant output filtering and first-error isolation
//! - `config` - Build options, banner markers, and the persisted settings file
//! - `session` - One end-to-end build invocation (batch or live)
//! - `sink` - Output sink abstraction for terminals and embedding hosts
//! - `subprocess` - Unified subprocess abstraction layer for testing
pub mod catkin;
pub mod classifier;
pub mod config;
pub mod session;
pub mod sink;
pub mod subprocess;
