//! Stress and exhaustion harness for nodealloc.
//!
//! This crate provides:
//! - Workloads: threaded canary churn and budgeted exhaustion scenarios
//! - Structured JSONL logging of harness runs and arena lifecycle records
//! - A log validator for the emitted JSONL

#![deny(unsafe_code)]

pub mod structured_log;
pub mod workload;

use thiserror::Error;

pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
pub use workload::{
    ExhaustConfig, ExhaustReport, StressConfig, StressReport, run_exhaustion, run_stress,
};

/// Harness failure.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),
    #[error("{errors} invalid line(s) in {path}")]
    InvalidLog { path: String, errors: usize },
}
