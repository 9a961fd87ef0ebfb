//! `sight-harness`: a CLI exercising the buffer manager and logger crates.
//!
//! Subcommands:
//! - `probe` — print the platform memory probe's report.
//! - `buffers` — register a list of byte-sized buffers under a chosen
//!   eviction policy and report residency/stats.
//! - `log demo` — write records, rotate the encryption key mid-stream,
//!   write more, and extract the merged plaintext.
//! - `log extract` — decrypt/decompress one log file in isolation.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sight_harness::{
    probe_report, resolve_log_password, resolve_scratch_dir, run_buffers, run_extract, run_log_demo,
    BufferRunConfig, LogDemoConfig, PolicyChoice,
};

#[derive(Parser)]
#[command(name = "sight-harness", about = "Exercise the sight-memory and sight-log crates")]
struct Cli {
    /// Overrides `SIGHT_SCRATCH_DIR` for the `buffers` subcommand.
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report total/free/used/process/estimated-free system memory.
    Probe,
    /// Register buffers under a policy and report their residency.
    Buffers {
        /// `ByteSize` literals, e.g. `100 MiB`, one per buffer.
        #[arg(long, required = true, num_args = 1..)]
        sizes: Vec<String>,
        /// `never` (default), `barrier`, or `valve`.
        #[arg(long, default_value = "never")]
        policy: String,
        #[arg(long)]
        barrier: Option<String>,
        #[arg(long)]
        min_free_mem: Option<String>,
        #[arg(long)]
        hysteresis_offset: Option<String>,
    },
    /// Logger subcommands.
    #[command(subcommand)]
    Log(LogCommand),
}

#[derive(Subcommand)]
enum LogCommand {
    /// Write records, rotate the key mid-stream, then extract the result.
    Demo {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        old_password: Option<String>,
        #[arg(long)]
        new_password: String,
        #[arg(long, num_args = 0.., default_values_t = vec!["hello".to_string(), "world".to_string()])]
        before: Vec<String>,
        #[arg(long, num_args = 0.., default_values_t = vec!["after rotation".to_string()])]
        after: Vec<String>,
    },
    /// Decrypt/decompress one log file.
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Probe => {
            let report = probe_report();
            print_report(&report, cli.json, || report.human.clone());
            Ok(())
        }
        Command::Buffers {
            sizes,
            policy,
            barrier,
            min_free_mem,
            hysteresis_offset,
        } => run(|| {
            let Some(policy) = PolicyChoice::parse(&policy) else {
                eprintln!("unknown policy {policy:?}; expected never/barrier/valve");
                return Err(());
            };
            let scratch_dir = resolve_scratch_dir(cli.scratch_dir.clone());
            let config = BufferRunConfig {
                sizes,
                policy,
                barrier,
                min_free_mem,
                hysteresis_offset,
            };
            match run_buffers(&scratch_dir, &config) {
                Ok(report) => {
                    print_report(&report, cli.json, || {
                        format!(
                            "total_managed={} total_dumped={} num_buffers={} resident={:?}",
                            report.stats.total_managed, report.stats.total_dumped, report.stats.num_buffers, report.resident
                        )
                    });
                    Ok(())
                }
                Err(err) => {
                    eprintln!("buffers run failed: {err}");
                    Err(())
                }
            }
        }),
        Command::Log(LogCommand::Demo {
            dir,
            old_password,
            new_password,
            before,
            after,
        }) => run(|| {
            let old_password = resolve_log_password(old_password).unwrap_or_default();
            let config = LogDemoConfig {
                dir,
                old_password,
                new_password,
                messages_before: before,
                messages_after: after,
            };
            match run_log_demo(&config) {
                Ok(report) => {
                    print_report(&report, cli.json, || report.extracted_text.clone());
                    Ok(())
                }
                Err(err) => {
                    eprintln!("log demo failed: {err}");
                    Err(())
                }
            }
        }),
        Command::Log(LogCommand::Extract { input, output, password }) => run(|| {
            let password = resolve_log_password(password);
            match run_extract(&input, &output, password.as_deref()) {
                Ok(()) => {
                    println!("wrote {}", output.display());
                    Ok(())
                }
                Err(err) => {
                    eprintln!("extract failed: {err}");
                    Err(())
                }
            }
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}

fn run(f: impl FnOnce() -> Result<(), ()>) -> Result<(), ()> {
    f()
}

fn print_report<T: serde::Serialize>(report: &T, json: bool, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render json: {err}"),
        }
    } else {
        println!("{}", text());
    }
}
