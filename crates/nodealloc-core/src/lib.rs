//! Two-tier size-classed node allocator.
//!
//! Small requests (up to 128 bytes) are rounded to one of 16 size classes and
//! served from intrusive free lists. The lists are refilled in batches from a
//! bump pool, and the pool is grown from the system allocator geometrically.
//! Larger requests pass straight through to the system.
//!
//! # Architecture
//!
//! - **Size classes** (`size_class`): rounding and class arithmetic
//! - **Blocks** (`block`): the dual view of a pooled block (bytes or link)
//! - **Free lists** (`free_list`): per-class LIFO stacks
//! - **Pool** (`pool`): chunk carving, leftover recycling, cannibalization
//! - **System adapter** (`system`): raw sources, OOM handler, failure policy
//! - **Arena** (`arena`): the locked two-tier facade
//! - **Typed adapter** (`typed`): element-count front end for containers
//! - **Global arena** (`global`): process-wide instance (`threads` feature)
//! - **Configuration** (`config`), **metrics** (`metrics`), **lifecycle log** (`log`)
//!
//! Unsafe code is confined to the modules that touch raw memory.

#![deny(unsafe_code)]

pub mod arena;
mod block;
pub mod config;
pub mod error;
mod free_list;
#[cfg(feature = "threads")]
pub mod global;
pub mod guard;
pub mod log;
pub mod metrics;
mod pool;
pub mod size_class;
pub mod system;
pub mod typed;

pub use arena::{Arena, ArenaStats, LocalArena};
pub use config::{ArenaConfig, FailureMode};
pub use error::AllocError;
pub use guard::{DefaultLock, NoLock};
pub use log::{ArenaEvent, ArenaEventKind, LogLevel};
pub use metrics::{ArenaMetrics, MetricsSnapshot};
pub use size_class::{ALIGN, MAX_BYTES, NUM_CLASSES};
#[cfg(unix)]
pub use system::Malloc;
pub use system::{Budget, BudgetedSource, DefaultSource, OomHandler, RawSource, StdHeap};
pub use typed::TypedAlloc;
