//! Error kinds surfaced by the buffer registry (spec §7).

use thiserror::Error;

/// Errors returned by [`crate::byte_size::ByteSize::parse`] and friends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BadCast {
    /// The literal did not match the `WS (int|real) WS unit? WS` grammar.
    #[error("bad size literal: {0:?}")]
    Malformed(String),
    /// The literal parsed but named a negative quantity.
    #[error("bad size: {0} < 0")]
    Negative(String),
    /// The literal parsed but overflowed a `u64` byte count.
    #[error("bad size: {0:?} overflows u64 bytes")]
    Overflow(String),
}

/// Errors surfaced by the buffer manager's public contract.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A byte-size literal failed to parse (policy parameter, CLI arg, ...).
    #[error(transparent)]
    BadCast(#[from] BadCast),

    /// Writing a buffer's bytes to the scratch directory failed.
    #[error("failed to write scratch file {path}: {source}")]
    IoWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a buffer's bytes back from the scratch directory failed.
    #[error("failed to read scratch file {path}: {source}")]
    IoReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `dump`/`restore`/`unregister` attempted on a buffer in a state that
    /// forbids the operation (locked, already resident, empty, ...).
    #[error("invalid buffer state: {0}")]
    InvalidState(&'static str),

    /// A policy's `set(name, value)` named a parameter it does not recognize.
    #[error("unknown policy parameter: {0:?}")]
    UnknownParam(String),

    /// The handle does not refer to a live buffer.
    #[error("unknown buffer handle: {0:?}")]
    UnknownHandle(crate::buffer::Handle),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
