//! Log record formatting and encrypted-sink write throughput (spec §4.8, C8).

use criterion::{criterion_group, criterion_main, black_box, Criterion};
use sight_log::{LogRecord, Logger, Severity, SinkFilter};

fn bench_format_line(c: &mut Criterion) {
    let record = LogRecord::new(Severity::Info, "steady-state log line with a representative length");
    c.bench_function("log_record_format_line", |b| {
        b.iter(|| black_box(record.format_line()));
    });
}

fn bench_plain_file_dispatch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let logger = Logger::new();
    logger
        .add_plain_file(
            dir.path().join("bench.log"),
            SinkFilter {
                min_severity: Severity::Trace,
                channel: None,
            },
            None,
            false,
        )
        .unwrap();

    c.bench_function("log_plain_file_dispatch", |b| {
        b.iter(|| logger.log(LogRecord::new(Severity::Info, "benchmark line")));
    });
}

fn bench_encrypted_file_dispatch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let logger = Logger::new();
    logger
        .add_encrypted_file(
            dir.path().join("bench.log"),
            "bench-password",
            SinkFilter {
                min_severity: Severity::Trace,
                channel: None,
            },
            false,
        )
        .unwrap();

    c.bench_function("log_encrypted_file_dispatch", |b| {
        b.iter(|| logger.log(LogRecord::new(Severity::Info, "benchmark line")));
    });
    logger.shutdown();
}

criterion_group!(benches, bench_format_line, bench_plain_file_dispatch, bench_encrypted_file_dispatch);
criterion_main!(benches);
