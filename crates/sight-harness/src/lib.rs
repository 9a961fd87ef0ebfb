//! Command implementations behind the `sight-harness` CLI (see `main.rs`).
//!
//! Kept separate from `main.rs` so the scenarios it demonstrates —
//! buffer registration under a policy, the platform probe report, and the
//! logger's rotate-key/extract cycle — are unit-testable without shelling
//! out to the binary, matching the teacher's split between a thin `main.rs`
//! and a library crate the `tests/` directory exercises directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use sight_log::{extract as log_extract, LogError, LogRecord, Logger, Severity, SinkFilter};
use sight_memory::{BarrierDump, BufferManager, ByteSize, MemoryError, Stats, ValveDump};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("failed to register a buffer of size {0:?}")]
    RegisterFailed(String),
}

/// `SIGHT_SCRATCH_DIR`, falling back to an explicit CLI flag, falling back
/// to a temp-dir default (spec §2 ambient config surface).
#[must_use]
pub fn resolve_scratch_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("SIGHT_SCRATCH_DIR").map(PathBuf::from))
        .unwrap_or_else(|| std::env::temp_dir().join("sight-harness-scratch"))
}

/// `SIGHT_LOG_PASSWORD`, falling back to an explicit CLI flag.
#[must_use]
pub fn resolve_log_password(explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| std::env::var("SIGHT_LOG_PASSWORD").ok())
}

/// The `probe` subcommand's machine-readable output (spec §2 supplemented
/// feature: `PlatformProbe::report()`).
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub total_system: u64,
    pub free_system: u64,
    pub used_system: u64,
    pub used_process: u64,
    pub estimate_free: u64,
    pub human: String,
}

#[must_use]
pub fn probe_report() -> ProbeReport {
    let probe = sight_memory::PlatformProbe::new();
    ProbeReport {
        total_system: probe.total_system().bytes(),
        free_system: probe.free_system().bytes(),
        used_system: probe.used_system().bytes(),
        used_process: probe.used_process().bytes(),
        estimate_free: probe.estimate_free().bytes(),
        human: probe.report(),
    }
}

/// Which eviction policy the `buffers` subcommand installs before
/// registering its test buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChoice {
    Never,
    Barrier,
    Valve,
}

impl PolicyChoice {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Some(Self::Never),
            "barrier" => Some(Self::Barrier),
            "valve" => Some(Self::Valve),
            _ => None,
        }
    }
}

/// Parameters for the `buffers` subcommand: a list of `ByteSize` literals
/// to register and the policy to register them under.
pub struct BufferRunConfig {
    pub sizes: Vec<String>,
    pub policy: PolicyChoice,
    pub barrier: Option<String>,
    pub min_free_mem: Option<String>,
    pub hysteresis_offset: Option<String>,
}

/// Per-buffer and aggregate results of a `buffers` run.
#[derive(Debug, Serialize)]
pub struct BufferRunReport {
    pub stats: Stats,
    pub resident: Vec<bool>,
}

/// Register one buffer per entry of `config.sizes` under the requested
/// policy and report which ones ended up resident — a scriptable rendition
/// of the manual S1-S5 scenarios from spec §8.
pub fn run_buffers(scratch_dir: &Path, config: &BufferRunConfig) -> Result<BufferRunReport, HarnessError> {
    let manager = BufferManager::new(scratch_dir);

    match config.policy {
        PolicyChoice::Never => {}
        PolicyChoice::Barrier => {
            let policy = Arc::new(BarrierDump::new());
            if let Some(barrier) = &config.barrier {
                policy.set("barrier", barrier)?;
            }
            manager.set_policy(policy);
        }
        PolicyChoice::Valve => {
            let policy = Arc::new(ValveDump::new());
            if let Some(min_free) = &config.min_free_mem {
                policy.set("min_free_mem", min_free)?;
            }
            if let Some(hysteresis) = &config.hysteresis_offset {
                policy.set("hysteresis_offset", hysteresis)?;
            }
            manager.set_policy(policy);
        }
    }

    let mut handles = Vec::with_capacity(config.sizes.len());
    for literal in &config.sizes {
        let size = ByteSize::parse(literal).map_err(MemoryError::from)?;
        let handle = manager.register_buffer(size.bytes())?;
        handles.push(handle);
    }

    let resident = handles
        .iter()
        .map(|h| manager.info(*h).map(|info| info.resident).unwrap_or(false))
        .collect();

    Ok(BufferRunReport {
        stats: manager.stats(),
        resident,
    })
}

/// Parameters for the `log demo` subcommand: write a few records, rotate
/// the encryption key, write more, and report the final extracted text
/// (spec §4.8.3's rotate-then-merge protocol end to end).
pub struct LogDemoConfig {
    pub dir: PathBuf,
    pub old_password: String,
    pub new_password: String,
    pub messages_before: Vec<String>,
    pub messages_after: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LogDemoReport {
    pub initial_path: PathBuf,
    pub final_path: PathBuf,
    pub known_paths: Vec<PathBuf>,
    pub extracted_text: String,
}

pub fn run_log_demo(config: &LogDemoConfig) -> Result<LogDemoReport, HarnessError> {
    let logger = Logger::new();
    let id = logger.add_encrypted_file(
        config.dir.join("sight.log"),
        config.old_password.clone(),
        SinkFilter {
            min_severity: Severity::Trace,
            channel: None,
        },
        false,
    )?;
    let initial_path = logger.current_path(id).expect("sink just created");

    for message in &config.messages_before {
        logger.log(LogRecord::new(Severity::Info, message.clone()));
    }

    logger.rotate_key(id, &config.new_password, Some(&config.old_password))?;

    for message in &config.messages_after {
        logger.log(LogRecord::new(Severity::Info, message.clone()));
    }
    logger.shutdown();

    let final_path = logger.current_path(id).expect("sink survives rotation");
    let known_paths = logger.known_paths(id).unwrap_or_default();

    let extracted = config.dir.join("sight-extracted.txt");
    log_extract(&final_path, &extracted, Some(&config.new_password))?;
    let extracted_text = std::fs::read_to_string(&extracted).unwrap_or_default();

    Ok(LogDemoReport {
        initial_path,
        final_path,
        known_paths,
        extracted_text,
    })
}

/// The standalone `log extract` subcommand: decrypt/decompress one file.
pub fn run_extract(input: &Path, output: &Path, password: Option<&str>) -> Result<(), HarnessError> {
    log_extract(input, output, password).map_err(HarnessError::from)
}
