//! Structured multi-severity logger with compressed, optionally encrypted
//! file sinks, online key rotation/relocation, and decrypt-and-dump
//! extraction (spec §4.8, C8).
//!
//! [`Logger`] is the façade an application holds: it owns zero or more
//! sinks ([`sink::SinkFilter`]-gated console/plain-file/encrypted-file
//! destinations) and dispatches every [`record::LogRecord`] to all of them.
//! [`default_logger`] exposes the process-wide singleton described in
//! `SPEC_FULL.md` §9.

pub mod compress;
pub mod crypto;
pub mod encrypted;
pub mod error;
pub mod logger;
pub mod path_util;
pub mod record;
pub mod severity;
pub mod sink;

pub use encrypted::EncryptedFileSink;
pub use error::{LogError, Result};
pub use logger::{default_logger, extract, shutdown_default_logger, Logger, SinkId};
pub use record::LogRecord;
pub use severity::Severity;
pub use sink::SinkFilter;
