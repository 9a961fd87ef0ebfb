//! Console and plain-file sinks, and the sync/async dispatch they share
//! (spec §4.8.1, §5 "Logger (C8)").
//!
//! Grounded in `original_source/libs/__/core/log/spy_logger.cpp`'s
//! `add_console_log`/`add_file_log`: a severity floor, an optional channel
//! filter, and either direct writes or a background-thread queue.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use parking_lot::Mutex;

use crate::error::{LogError, Result};
use crate::path_util::unique_path;
use crate::record::LogRecord;
use crate::severity::Severity;

/// Shared by every sink kind: the severity floor and optional channel
/// equality filter a record must pass to be emitted (spec §4.8.5).
#[derive(Debug, Clone)]
pub struct SinkFilter {
    pub min_severity: Severity,
    pub channel: Option<String>,
}

impl SinkFilter {
    #[must_use]
    pub fn accepts(&self, record: &LogRecord) -> bool {
        record.passes(self.min_severity, self.channel.as_deref())
    }
}

/// A destination a formatted line can be written to.
pub(crate) trait SinkBody: Send {
    fn write_line(&mut self, line: &str) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct ConsoleBody;

impl SinkBody for ConsoleBody {
    fn write_line(&mut self, line: &str) -> Result<()> {
        eprintln!("{line}");
        Ok(())
    }
}

/// A plain file sink with size-based rotation (spec §2 supplemented
/// feature: the upstream boost::log sinks rotate by size uniformly; the
/// distillation only mentions rotation for the encrypted case).
pub(crate) struct PlainFileBody {
    base_path: PathBuf,
    max_bytes: Option<u64>,
    file: std::fs::File,
    current_path: PathBuf,
    written: u64,
}

impl PlainFileBody {
    pub(crate) fn open(base_path: impl Into<PathBuf>, max_bytes: Option<u64>) -> Result<Self> {
        let base_path = base_path.into();
        let current_path = unique_path(&base_path);
        let file = open_new(&current_path)?;
        Ok(Self {
            base_path,
            max_bytes,
            file,
            current_path,
            written: 0,
        })
    }

    #[must_use]
    pub(crate) fn current_path(&self) -> &Path {
        &self.current_path
    }

    fn roll_if_needed(&mut self, incoming: u64) -> Result<()> {
        let Some(max) = self.max_bytes else {
            return Ok(());
        };
        if self.written > 0 && self.written + incoming > max {
            self.current_path = unique_path(&self.base_path);
            self.file = open_new(&self.current_path)?;
            self.written = 0;
        }
        Ok(())
    }
}

impl SinkBody for PlainFileBody {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.roll_if_needed(line.len() as u64 + 1)?;
        writeln!(self.file, "{line}").map_err(|source| LogError::IoWriteFailed {
            path: self.current_path.clone(),
            source,
        })?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|source| LogError::IoWriteFailed {
            path: self.current_path.clone(),
            source,
        })
    }
}

fn open_new(path: &Path) -> Result<std::fs::File> {
    std::fs::File::create(path).map_err(|source| LogError::IoWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

enum Dispatch {
    Sync(Mutex<Box<dyn SinkBody>>),
    Async(AsyncWorker),
}

enum WorkItem {
    Line(String),
    Flush,
    /// Flush and signal back once done; used by `fatal` (spec §5: "`fatal`
    /// bypasses async queueing: it flushes synchronously then aborts").
    FlushAck(SyncSender<()>),
    Shutdown,
}

/// Background thread draining a bounded queue (spec §5: "enqueue... is
/// lock-free from the caller's perspective when a sink is async").
struct AsyncWorker {
    tx: SyncSender<WorkItem>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl AsyncWorker {
    fn spawn(mut body: Box<dyn SinkBody>) -> Self {
        let (tx, rx): (SyncSender<WorkItem>, Receiver<WorkItem>) = sync_channel(1024);
        let handle = std::thread::spawn(move || {
            while let Ok(item) = rx.recv() {
                match item {
                    WorkItem::Line(line) => {
                        if let Err(err) = body.write_line(&line) {
                            log::error!("async sink write failed: {err}");
                        }
                    }
                    WorkItem::Flush => {
                        if let Err(err) = body.flush() {
                            log::error!("async sink flush failed: {err}");
                        }
                    }
                    WorkItem::FlushAck(ack) => {
                        if let Err(err) = body.flush() {
                            log::error!("async sink flush failed: {err}");
                        }
                        let _ = ack.send(());
                    }
                    WorkItem::Shutdown => break,
                }
            }
            let _ = body.flush();
        });
        Self {
            tx,
            handle: Some(handle),
        }
    }
}

impl Drop for AsyncWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkItem::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One configured sink: a filter plus either a direct or queued destination.
pub struct Sink {
    filter: SinkFilter,
    dispatch: Dispatch,
}

impl Sink {
    pub(crate) fn new_sync(filter: SinkFilter, body: Box<dyn SinkBody>) -> Self {
        Self {
            filter,
            dispatch: Dispatch::Sync(Mutex::new(body)),
        }
    }

    pub(crate) fn new_async(filter: SinkFilter, body: Box<dyn SinkBody>) -> Self {
        Self {
            filter,
            dispatch: Dispatch::Async(AsyncWorker::spawn(body)),
        }
    }

    /// Submit a record if it passes this sink's filter. Never blocks on
    /// disk I/O for an async sink.
    pub fn emit(&self, record: &LogRecord) {
        if !self.filter.accepts(record) {
            return;
        }
        let line = record.format_line();
        match &self.dispatch {
            Dispatch::Sync(body) => {
                if let Err(err) = body.lock().write_line(&line) {
                    log::error!("sink write failed: {err}");
                }
            }
            Dispatch::Async(worker) => {
                if worker.tx.try_send(WorkItem::Line(line)).is_err() {
                    log::warn!("async sink queue full, dropping record");
                }
            }
        }
    }

    /// Write and flush `record` before returning, even for an async sink
    /// (spec §4.8.5/§5: `fatal` never queues).
    pub fn emit_fatal(&self, record: &LogRecord) {
        if !self.filter.accepts(record) {
            return;
        }
        let line = record.format_line();
        match &self.dispatch {
            Dispatch::Sync(body) => {
                let mut guard = body.lock();
                let _ = guard.write_line(&line);
                let _ = guard.flush();
            }
            Dispatch::Async(worker) => {
                let (ack_tx, ack_rx) = sync_channel(0);
                let _ = worker.tx.send(WorkItem::Line(line));
                let _ = worker.tx.send(WorkItem::FlushAck(ack_tx));
                let _ = ack_rx.recv();
            }
        }
    }

    /// Block until every record submitted so far has been written
    /// (spec §4.8.5: `fatal` flushes synchronously even in async mode).
    pub fn flush(&self) {
        match &self.dispatch {
            Dispatch::Sync(body) => {
                let _ = body.lock().flush();
            }
            Dispatch::Async(worker) => {
                let _ = worker.tx.send(WorkItem::Flush);
            }
        }
    }
}
