//! Structured arena lifecycle records.
//!
//! Only slow-path transitions are recorded (refill, growth, leftover
//! recycling, cannibalization, OOM handling). The free-list fast path never
//! touches the log. Records live in a bounded ring; once it is full the oldest
//! record is evicted and counted in `dropped`.

use std::collections::VecDeque;

use serde::Serialize;

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Slow-path transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaEventKind {
    /// A free list ran dry and was refilled from the pool.
    Refill,
    /// The pool window was replaced by a fresh region from the system.
    ChunkGrowth,
    /// A too-small pool remainder was pushed onto its own class.
    LeftoverRecycled,
    /// A free block of a larger class became the pool window.
    Cannibalized,
    /// The OOM handler was invoked before retrying the system.
    OomHandlerInvoked,
    /// Final exhaustion.
    OutOfMemory,
}

impl ArenaEventKind {
    /// Default severity for this kind.
    #[must_use]
    pub const fn level(self) -> LogLevel {
        match self {
            Self::Refill | Self::LeftoverRecycled => LogLevel::Debug,
            Self::ChunkGrowth => LogLevel::Info,
            Self::Cannibalized | Self::OomHandlerInvoked => LogLevel::Warn,
            Self::OutOfMemory => LogLevel::Error,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Refill => "refill",
            Self::ChunkGrowth => "chunk_growth",
            Self::LeftoverRecycled => "leftover_recycled",
            Self::Cannibalized => "cannibalized",
            Self::OomHandlerInvoked => "oom_handler_invoked",
            Self::OutOfMemory => "out_of_memory",
        }
    }
}

/// One lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArenaEvent {
    /// Monotonic sequence number within the arena.
    pub seq: u64,
    /// Severity.
    pub level: LogLevel,
    /// Transition kind.
    pub kind: ArenaEventKind,
    /// Block size being served, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Size class involved, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<usize>,
    /// Byte count moved by the transition (region size, leftover, blocks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    /// Snapshot: cumulative bytes acquired for the pool.
    pub heap_bytes: usize,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
}

/// Builder-style input for [`EventLog::record`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventFields {
    pub(crate) size: Option<usize>,
    pub(crate) class: Option<usize>,
    pub(crate) bytes: Option<usize>,
    pub(crate) heap_bytes: usize,
    pub(crate) outcome: &'static str,
}

impl EventFields {
    pub(crate) const fn new(heap_bytes: usize, outcome: &'static str) -> Self {
        Self {
            size: None,
            class: None,
            bytes: None,
            heap_bytes,
            outcome,
        }
    }

    pub(crate) const fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) const fn class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    pub(crate) const fn bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

/// Bounded ring of lifecycle records.
#[derive(Debug)]
pub struct EventLog {
    records: VecDeque<ArenaEvent>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl EventLog {
    /// Creates an empty log retaining at most `capacity` records.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            next_seq: 1,
            dropped: 0,
        }
    }

    pub(crate) fn record(&mut self, kind: ArenaEventKind, fields: EventFields) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(ArenaEvent {
            seq,
            level: kind.level(),
            kind,
            size: fields.size,
            class: fields.class,
            bytes: fields.bytes,
            heap_bytes: fields.heap_bytes,
            outcome: fields.outcome,
        });
    }

    /// Copies out the retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ArenaEvent> {
        self.records.iter().cloned().collect()
    }

    /// Takes the retained records, oldest first, leaving the ring empty.
    pub fn drain(&mut self) -> Vec<ArenaEvent> {
        self.records.drain(..).collect()
    }

    /// Number of records currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records evicted or discarded because of the capacity bound.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
