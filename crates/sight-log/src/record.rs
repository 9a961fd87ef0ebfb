//! Log records and their on-disk line format (spec §6, §4.8.5).

use std::sync::OnceLock;
use std::time::Instant;

use chrono::Local;

use crate::severity::Severity;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn current_pid() -> u32 {
    std::process::id()
}

/// Best-effort OS thread id. Falls back to a debug-formatted
/// [`std::thread::ThreadId`] on platforms without a numeric one.
fn current_tid() -> String {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid() has no preconditions and cannot fail.
        return unsafe { libc::syscall(libc::SYS_gettid) }.to_string();
    }
    #[cfg(not(target_os = "linux"))]
    {
        format!("{:?}", std::thread::current().id())
    }
}

/// One emitted log line (spec §6): a timestamp, a process uptime, the
/// emitting pid/tid, severity, source location and message.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub severity: Severity,
    pub channel: Option<String>,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
    pub message: String,
    pid: u32,
    tid: String,
    uptime: std::time::Duration,
}

impl LogRecord {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            channel: None,
            file: None,
            line: None,
            message: message.into(),
            pid: current_pid(),
            tid: current_tid(),
            uptime: process_start().elapsed(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, file: &'static str, line: u32) -> Self {
        self.file = Some(file);
        self.line = Some(line);
        self
    }

    /// Whether a sink with the given filter should emit this record (spec
    /// §4.8.1/§4.8.5): severity at or above the sink's floor, and either the
    /// sink has no channel filter or it matches exactly.
    #[must_use]
    pub fn passes(&self, min_severity: Severity, channel_filter: Option<&str>) -> bool {
        if self.severity < min_severity {
            return false;
        }
        match channel_filter {
            None => true,
            Some(wanted) => self.channel.as_deref() == Some(wanted),
        }
    }

    /// `[d.m.Y H:M:S.f][uptime H:M:S.f][pid][tid][severity] [file:line] message`.
    #[must_use]
    pub fn format_line(&self) -> String {
        let now = Local::now();
        let timestamp = now.format("%d.%m.%Y %H:%M:%S%.6f");
        let uptime = format_duration(self.uptime);
        let location = match (self.file, self.line) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            (Some(file), None) => file.to_string(),
            _ => String::from("?"),
        };
        format!(
            "[{timestamp}][{uptime}][{pid}][{tid}][{severity}] [{location}] {message}",
            pid = self.pid,
            tid = self.tid,
            severity = self.severity,
            message = self.message,
        )
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let micros = d.subsec_micros();
    format!("{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_line_contains_all_fields() {
        let record = LogRecord::new(Severity::Warn, "disk nearly full").with_location("probe.rs", 42);
        let line = record.format_line();
        assert!(line.contains("[WARN]"));
        assert!(line.contains("probe.rs:42"));
        assert!(line.contains("disk nearly full"));
    }

    #[test]
    fn channel_filter_matches_exactly() {
        let record = LogRecord::new(Severity::Info, "hello").with_channel("net");
        assert!(record.passes(Severity::Trace, Some("net")));
        assert!(!record.passes(Severity::Trace, Some("disk")));
        assert!(record.passes(Severity::Trace, None));
    }

    #[test]
    fn severity_floor_is_respected() {
        let record = LogRecord::new(Severity::Debug, "noise");
        assert!(!record.passes(Severity::Info, None));
        assert!(record.passes(Severity::Debug, None));
    }
}
