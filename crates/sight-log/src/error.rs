//! Error kinds surfaced by the logger core (spec §7).

use thiserror::Error;

/// Errors returned by sink setup, rotation, relocation and extraction.
#[derive(Debug, Error)]
pub enum LogError {
    /// A sink failed to open or write its destination file.
    #[error("failed to write log file {path}: {source}")]
    IoWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sink failed to read a file during merge or extraction.
    #[error("failed to read log file {path}: {source}")]
    IoReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `extract`'s verification header did not match the supplied password.
    #[error("wrong password for encrypted log")]
    BadPassword,

    /// The encrypted stream ended before a complete final cipher block, or
    /// the zstd frame never reached its epilogue — the file was truncated.
    #[error("log file ended prematurely during {0}")]
    PrematureEnd(&'static str),

    /// A sink operation was attempted in a state that forbids it (e.g.
    /// writing to a sink that has already been stopped).
    #[error("invalid sink state: {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, LogError>;
