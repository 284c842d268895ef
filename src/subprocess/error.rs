use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {command} (searched PATH: {search_path})")]
    CommandNotFound { command: String, search_path: String },

    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}
