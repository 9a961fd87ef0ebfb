//! The logger core (spec §4.8, C8): a severity-filtered multiplexer over an
//! arbitrary number of console/plain-file/encrypted-file sinks, plus the
//! rotation/relocation/extraction entry points that act on the encrypted
//! ones.
//!
//! Grounded in `original_source/libs/__/core/log/spy_logger.cpp`'s
//! `SpyLogger`: a single façade owning every sink, dispatching each record
//! to all of them, and tracking the encrypted sink's path history for
//! `rotate_key`/`relocate` (spec §4.8.3).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::encrypted::{self, EncryptedFileSink};
use crate::error::{LogError, Result};
use crate::record::LogRecord;
use crate::severity::Severity;
use crate::sink::{ConsoleBody, PlainFileBody, Sink, SinkFilter};

/// Handle to one sink registered with a [`Logger`]. Stable for the sink's
/// lifetime; never reused (mirrors [`crate::buffer::Handle`]'s contract in
/// the companion crate, spec §9's "opaque handle" design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

enum EncWork {
    Line(String),
    FlushAck(SyncSender<()>),
    Shutdown,
}

/// An encrypted file sink's dispatch, separate from the generic [`Sink`]
/// because [`encrypted::rotate_key`]/[`encrypted::relocate`] need direct
/// access to the `Arc<Mutex<EncryptedFileSink>>`, not a type-erased body.
struct EncryptedDispatch {
    filter: SinkFilter,
    handle: Arc<Mutex<EncryptedFileSink>>,
    worker: Option<(SyncSender<EncWork>, std::thread::JoinHandle<()>)>,
}

impl EncryptedDispatch {
    fn new_sync(filter: SinkFilter, handle: Arc<Mutex<EncryptedFileSink>>) -> Self {
        Self {
            filter,
            handle,
            worker: None,
        }
    }

    fn new_async(filter: SinkFilter, handle: Arc<Mutex<EncryptedFileSink>>) -> Self {
        let (tx, rx): (SyncSender<EncWork>, Receiver<EncWork>) = sync_channel(1024);
        let worker_handle = handle.clone();
        let join = std::thread::spawn(move || {
            while let Ok(item) = rx.recv() {
                match item {
                    EncWork::Line(line) => {
                        if let Err(err) = crate::sink::SinkBody::write_line(&mut *worker_handle.lock(), &line) {
                            log::error!("async encrypted sink write failed: {err}");
                        }
                    }
                    EncWork::FlushAck(ack) => {
                        let _ = worker_handle.lock().flush();
                        let _ = ack.send(());
                    }
                    EncWork::Shutdown => break,
                }
            }
        });
        Self {
            filter,
            handle,
            worker: Some((tx, join)),
        }
    }

    fn emit(&self, record: &LogRecord) {
        if !self.filter.accepts(record) {
            return;
        }
        let line = record.format_line();
        match &self.worker {
            Some((tx, _)) => {
                if tx.try_send(EncWork::Line(line)).is_err() {
                    log::warn!("async encrypted sink queue full, dropping record");
                }
            }
            None => {
                if let Err(err) = crate::sink::SinkBody::write_line(&mut *self.handle.lock(), &line) {
                    log::error!("encrypted sink write failed: {err}");
                }
            }
        }
    }

    fn emit_fatal(&self, record: &LogRecord) {
        if !self.filter.accepts(record) {
            return;
        }
        let line = record.format_line();
        match &self.worker {
            Some((tx, _)) => {
                let (ack_tx, ack_rx) = sync_channel(0);
                let _ = tx.send(EncWork::Line(line));
                let _ = tx.send(EncWork::FlushAck(ack_tx));
                let _ = ack_rx.recv();
            }
            None => {
                let mut guard = self.handle.lock();
                let _ = crate::sink::SinkBody::write_line(&mut *guard, &line);
                let _ = guard.flush();
            }
        }
    }

    /// Stop the background worker (if any) so rotation can safely swap the
    /// `EncryptedFileSink` out from under this dispatch.
    fn stop_worker(&mut self) {
        if let Some((tx, join)) = self.worker.take() {
            let _ = tx.send(EncWork::Shutdown);
            let _ = join.join();
        }
    }

    fn restart_worker_if_async(&mut self, was_async: bool) {
        if was_async {
            let fresh = Self::new_async(self.filter.clone(), self.handle.clone());
            self.worker = fresh.worker;
        }
    }
}

enum NamedSink {
    Plain(Sink),
    Encrypted(EncryptedDispatch),
}

struct Entry {
    id: SinkId,
    sink: NamedSink,
}

/// The logger façade (spec §4.8): owns every sink, dispatches records to
/// all of them, and exposes rotation/relocation/extraction for the
/// encrypted ones.
///
/// Construction is explicit (no implicit global state); see
/// [`default_logger`] for the process-wide singleton the rest of an
/// application is expected to share.
pub struct Logger {
    sinks: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Logger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> SinkId {
        SinkId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a console sink (spec §4.8.1). Always synchronous: there is no
    /// disk I/O to hide behind a queue.
    pub fn add_console(&self, filter: SinkFilter) -> SinkId {
        let id = self.alloc_id();
        let sink = Sink::new_sync(filter, Box::new(ConsoleBody));
        self.sinks.lock().push(Entry {
            id,
            sink: NamedSink::Plain(sink),
        });
        id
    }

    /// Add a plain (uncompressed, unencrypted) file sink with optional
    /// size-based rotation (spec §2 supplemented feature).
    pub fn add_plain_file(
        &self,
        path: impl Into<PathBuf>,
        filter: SinkFilter,
        max_bytes: Option<u64>,
        asynchronous: bool,
    ) -> Result<SinkId> {
        let id = self.alloc_id();
        let body = Box::new(PlainFileBody::open(path, max_bytes)?);
        let sink = if asynchronous {
            Sink::new_async(filter, body)
        } else {
            Sink::new_sync(filter, body)
        };
        self.sinks.lock().push(Entry {
            id,
            sink: NamedSink::Plain(sink),
        });
        Ok(id)
    }

    /// Add a compressed, optionally encrypted file sink (spec §4.8.2). An
    /// empty password leaves the stream zstd-compressed but unencrypted.
    pub fn add_encrypted_file(
        &self,
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        filter: SinkFilter,
        asynchronous: bool,
    ) -> Result<SinkId> {
        let id = self.alloc_id();
        let handle = Arc::new(Mutex::new(EncryptedFileSink::start(path, password)?));
        let dispatch = if asynchronous {
            EncryptedDispatch::new_async(filter, handle)
        } else {
            EncryptedDispatch::new_sync(filter, handle)
        };
        self.sinks.lock().push(Entry {
            id,
            sink: NamedSink::Encrypted(dispatch),
        });
        Ok(id)
    }

    /// Dispatch a record to every sink whose filter accepts it. A `Fatal`
    /// record is flushed synchronously to every sink (even async ones) and
    /// then aborts the process (spec §4.8.5, §5: "Emitting a fatal aborts
    /// the process after the record is flushed; this is synchronous even
    /// in async mode").
    pub fn log(&self, record: LogRecord) {
        let fatal = record.severity == Severity::Fatal;
        let sinks = self.sinks.lock();
        for entry in sinks.iter() {
            match &entry.sink {
                NamedSink::Plain(sink) => {
                    if fatal {
                        sink.emit_fatal(&record);
                    } else {
                        sink.emit(&record);
                    }
                }
                NamedSink::Encrypted(dispatch) => {
                    if fatal {
                        dispatch.emit_fatal(&record);
                    } else {
                        dispatch.emit(&record);
                    }
                }
            }
        }
        drop(sinks);
        if fatal {
            std::process::abort();
        }
    }

    /// Block until every record submitted so far to every sink has been
    /// written.
    pub fn flush(&self) {
        for entry in self.sinks.lock().iter() {
            match &entry.sink {
                NamedSink::Plain(sink) => sink.flush(),
                NamedSink::Encrypted(dispatch) => {
                    if let Some((tx, _)) = &dispatch.worker {
                        let (ack_tx, ack_rx) = sync_channel(0);
                        let _ = tx.send(EncWork::FlushAck(ack_tx));
                        let _ = ack_rx.recv();
                    } else {
                        let _ = dispatch.handle.lock().flush();
                    }
                }
            }
        }
    }

    fn with_encrypted<R>(&self, id: SinkId, f: impl FnOnce(&mut EncryptedDispatch) -> R) -> Result<R> {
        let mut sinks = self.sinks.lock();
        let entry = sinks
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(LogError::InvalidState("no sink with that id"))?;
        match &mut entry.sink {
            NamedSink::Encrypted(dispatch) => Ok(f(dispatch)),
            NamedSink::Plain(_) => Err(LogError::InvalidState("sink is not encrypted")),
        }
    }

    /// `rotate_key(id, new_password, old_password)` (spec §4.8.3): stop the
    /// sink's worker, rotate in place, restart the worker if it was async.
    pub fn rotate_key(&self, id: SinkId, new_password: &str, old_password: Option<&str>) -> Result<()> {
        self.with_encrypted(id, |dispatch| {
            let was_async = dispatch.worker.is_some();
            dispatch.stop_worker();
            encrypted::rotate_key(&dispatch.handle, new_password, old_password)?;
            dispatch.restart_worker_if_async(was_async);
            Ok(())
        })?
    }

    /// `relocate(id, new_path, new_password, old_password)` (spec §4.8.3).
    pub fn relocate(
        &self,
        id: SinkId,
        new_path: &Path,
        new_password: &str,
        old_password: Option<&str>,
    ) -> Result<()> {
        self.with_encrypted(id, |dispatch| {
            let was_async = dispatch.worker.is_some();
            dispatch.stop_worker();
            encrypted::relocate(&dispatch.handle, new_path, new_password, old_password)?;
            dispatch.restart_worker_if_async(was_async);
            Ok(())
        })?
    }

    /// The encrypted sink's current on-disk path.
    #[must_use]
    pub fn current_path(&self, id: SinkId) -> Option<PathBuf> {
        self.with_encrypted(id, |dispatch| dispatch.handle.lock().current_path().to_path_buf())
            .ok()
    }

    /// The sequence of paths this encrypted sink has written to, including
    /// ones since merged away by rotation (spec §4.8.3 step 4, supplemented
    /// accessor — see `SPEC_FULL.md` §2).
    #[must_use]
    pub fn known_paths(&self, id: SinkId) -> Option<Vec<PathBuf>> {
        self.with_encrypted(id, |dispatch| dispatch.handle.lock().known_paths().to_vec())
            .ok()
    }

    /// Finalize every sink (spec §4.8.2 "On stop"): console/plain sinks
    /// just flush; encrypted sinks finalize their zstd frame and cipher
    /// padding.
    pub fn shutdown(&self) {
        let mut sinks = self.sinks.lock();
        for entry in sinks.iter_mut() {
            match &mut entry.sink {
                NamedSink::Plain(sink) => sink.flush(),
                NamedSink::Encrypted(dispatch) => {
                    dispatch.stop_worker();
                    if let Err(err) = dispatch.handle.lock().finalize() {
                        log::error!("failed to finalize encrypted sink: {err}");
                    }
                }
            }
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `extract(input, output, password)` (spec §4.8.4), exposed at the crate
/// root as a free function since it operates on files, not a live sink.
pub fn extract(input: &Path, output: &Path, password: Option<&str>) -> Result<()> {
    encrypted::extract(input, output, password)
}

static DEFAULT_LOGGER: OnceLock<Arc<Logger>> = OnceLock::new();

/// The process-wide default logger (spec §9: "The source exposes a global
/// default... worker; treat these as explicitly-initialized process-wide
/// singletons with a single teardown point at shutdown"). Lazily created
/// on first use with no sinks attached — callers add sinks once, then share
/// this handle everywhere else in the process.
#[must_use]
pub fn default_logger() -> Arc<Logger> {
    DEFAULT_LOGGER.get_or_init(|| Arc::new(Logger::new())).clone()
}

/// The single teardown point for [`default_logger`] (spec §9). Flushes and
/// finalizes every attached sink. Safe to call even if the default logger
/// was never initialized.
pub fn shutdown_default_logger() {
    if let Some(logger) = DEFAULT_LOGGER.get() {
        logger.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(min: Severity) -> SinkFilter {
        SinkFilter {
            min_severity: min,
            channel: None,
        }
    }

    #[test]
    fn logs_to_plain_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new();
        logger
            .add_plain_file(dir.path().join("app.log"), filter(Severity::Info), None, false)
            .unwrap();
        logger.log(LogRecord::new(Severity::Info, "hello world"));
        logger.flush();

        let written = std::fs::read_to_string(dir.path().join("app-1.log")).unwrap();
        assert!(written.contains("hello world"));
    }

    #[test]
    fn below_floor_records_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new();
        logger
            .add_plain_file(dir.path().join("app.log"), filter(Severity::Warn), None, false)
            .unwrap();
        logger.log(LogRecord::new(Severity::Debug, "too quiet"));
        logger.flush();

        let written = std::fs::read_to_string(dir.path().join("app-1.log")).unwrap();
        assert!(!written.contains("too quiet"));
    }

    #[test]
    fn s6_encrypt_extract_round_trip_and_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new();
        let id = logger
            .add_encrypted_file(dir.path().join("secure.log"), "p", filter(Severity::Trace), false)
            .unwrap();
        logger.log(LogRecord::new(Severity::Info, "hello"));
        logger.log(LogRecord::new(Severity::Info, "world"));
        logger.shutdown();

        let path = logger.current_path(id).unwrap();
        let out = dir.path().join("out.txt");
        extract(&path, &out, Some("p")).unwrap();
        let plaintext = std::fs::read_to_string(&out).unwrap();
        assert!(plaintext.contains("hello"));
        assert!(plaintext.contains("world"));

        let err = extract(&path, &out, Some("q")).unwrap_err();
        assert!(matches!(err, LogError::BadPassword));
    }

    #[test]
    fn rotate_key_then_log_uses_new_password() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new();
        let id = logger
            .add_encrypted_file(dir.path().join("secure.log"), "old", filter(Severity::Trace), false)
            .unwrap();
        logger.log(LogRecord::new(Severity::Info, "before"));
        logger.rotate_key(id, "new", Some("old")).unwrap();
        logger.log(LogRecord::new(Severity::Info, "after"));
        logger.shutdown();

        let path = logger.current_path(id).unwrap();
        let out = dir.path().join("out.txt");
        extract(&path, &out, Some("new")).unwrap();
        let plaintext = std::fs::read_to_string(&out).unwrap();
        assert!(plaintext.contains("before"));
        assert!(plaintext.contains("after"));
    }

    #[test]
    fn unknown_sink_id_is_invalid_state() {
        let logger = Logger::new();
        let bogus = SinkId(999);
        assert!(matches!(
            logger.rotate_key(bogus, "x", None),
            Err(LogError::InvalidState(_))
        ));
    }
}
