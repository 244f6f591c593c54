//! CLI entrypoint for the nodealloc harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use nodealloc_core::{Arena, ArenaConfig, FailureMode};
use nodealloc_harness::structured_log::{self, LogEmitter, LogEntry, LogLevel, Outcome};
use nodealloc_harness::workload::{self, ExhaustConfig, StressConfig};
use nodealloc_harness::HarnessError;
use serde::Serialize;

/// Stress and exhaustion tooling for nodealloc.
#[derive(Debug, Parser)]
#[command(name = "nodealloc-harness")]
#[command(about = "Stress and exhaustion harness for nodealloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the threaded canary workload against one shared arena.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 100_000)]
        ops: usize,
        /// Largest request size (values above 128 exercise the bypass path).
        #[arg(long, default_value_t = 256)]
        max_size: usize,
        /// Live blocks each thread keeps at most.
        #[arg(long, default_value_t = 256)]
        live_cap: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Output path for the JSON report (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Fill a budgeted arena until it fails, then free part and refill.
    Exhaust {
        /// Total bytes the system source may hand out.
        #[arg(long, default_value_t = 64 * 1024)]
        budget: usize,
        #[arg(long, default_value_t = 128)]
        size: usize,
        /// Free every n-th block after the first failure (0 skips the refill).
        #[arg(long, default_value_t = 4)]
        free_every: usize,
        #[arg(long, default_value_t = 32)]
        refill_size: usize,
        /// OOM handler calls allowed before it uninstalls itself (0 disables it).
        #[arg(long, default_value_t = 0)]
        handler_grants: u32,
        /// Bytes added to the budget per handler call.
        #[arg(long, default_value_t = 4096)]
        grant_bytes: usize,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("run-{secs}")
}

fn write_report<T: Serialize>(report: &T, output: Option<&Path>) -> Result<(), HarnessError> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("Wrote report to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stress {
            threads,
            ops,
            max_size,
            live_cap,
            seed,
            output,
            log,
        } => {
            let config = StressConfig {
                threads,
                ops_per_thread: ops,
                max_size,
                live_cap,
                seed: workload::parse_seed(&seed)?,
            };
            eprintln!("Stress: {threads} threads x {ops} ops, sizes 1..={max_size}");
            let arena = Arena::with_config(
                nodealloc_core::DefaultSource::new(),
                ArenaConfig::new().with_failure_mode(FailureMode::Error),
            );
            let report = workload::run_stress(&arena, &config)?;
            let outcome = if report.passed() { Outcome::Pass } else { Outcome::Fail };

            if let Some(path) = log {
                let mut emitter = LogEmitter::to_file(&path, "stress", &run_id())?;
                emitter.emit_arena_events("stress", &arena.drain_events())?;
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "stress.summary")
                        .with_scenario("stress")
                        .with_outcome(outcome)
                        .with_duration_ms(report.duration_ms)
                        .with_details(serde_json::to_value(&report.stats)?),
                )?;
                emitter.flush()?;
            }
            write_report(&report, output.as_deref())?;
            if outcome != Outcome::Pass {
                return Err(format!(
                    "stress failed: {} corruption(s), {} allocation failure(s)",
                    report.corruptions, report.failures
                )
                .into());
            }
        }
        Command::Exhaust {
            budget,
            size,
            free_every,
            refill_size,
            handler_grants,
            grant_bytes,
            output,
            log,
        } => {
            let config = ExhaustConfig {
                budget,
                size,
                free_every,
                refill_size,
                handler_grants,
                grant_bytes,
                ..ExhaustConfig::default()
            };
            eprintln!("Exhaust: budget {budget} bytes, fill size {size}");
            let report = workload::run_exhaustion(&config)?;

            if let Some(path) = log {
                let mut emitter = LogEmitter::to_file(&path, "exhaust", &run_id())?;
                emitter.emit_arena_events("exhaust", &report.events)?;
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "exhaust.summary")
                        .with_scenario("exhaust")
                        .with_outcome(Outcome::Pass)
                        .with_details(serde_json::json!({
                            "filled": report.filled,
                            "freed": report.freed,
                            "refilled": report.refilled,
                            "handler_calls": report.handler_calls,
                            "cannibalizations": report.stats.metrics.cannibalizations,
                        })),
                )?;
                emitter.flush()?;
            }
            write_report(&report, output.as_deref())?;
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = structured_log::validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(HarnessError::InvalidLog {
                    path: log.display().to_string(),
                    errors: errors.len(),
                }
                .into());
            }
            eprintln!("{}: {lines} line(s) valid", log.display());
        }
    }

    Ok(())
}
