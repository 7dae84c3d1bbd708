//! Error types for the engine adapter.
//!
//! Only session-level failures (spawning the engine, talking to its pipes,
//! loading configuration) are errors. Per-search results, including engine
//! crashes during a search, are reported as [`crate::SearchOutcome`] values.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The engine binary could not be started.
    #[error("failed to spawn engine at {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The engine process was started without one of its standard pipes.
    #[error("engine process has no {0}")]
    MissingPipe(&'static str),

    /// Writing a command to the engine failed.
    #[error("engine i/o error: {0}")]
    Io(#[from] io::Error),

    /// The session's dispatcher thread is gone (engine terminated).
    #[error("engine session is no longer running")]
    WorkerGone,

    /// Configuration could not be read or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
