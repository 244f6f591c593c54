//! Arena configuration.
//!
//! Two layers:
//! - `ArenaConfig`: per-arena knobs fixed at construction (`const fn` builder,
//!   so a process-wide arena can live in a `static`).
//! - Final-failure mode: when an arena does not pin one, it is taken from the
//!   `NODEALLOC_OOM_MODE` environment variable, falling back to the build-time
//!   default selected by the `abort-on-oom` feature:
//!   - `error` / `return` (default): return `AllocError::OutOfMemory`.
//!   - `abort` / `terminate`: print `out of memory` to stderr and abort.

use std::sync::atomic::{AtomicU8, Ordering};

/// Blocks carved per refill unless configured otherwise.
pub const DEFAULT_CHUNK_OBJECTS: usize = 20;

/// Lifecycle events retained per arena unless configured otherwise.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happens when memory is exhausted beyond recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureMode {
    /// Return `AllocError::OutOfMemory` to the caller.
    Error,
    /// Print a diagnostic and terminate the process.
    Abort,
}

impl FailureMode {
    /// Build-time default.
    pub const DEFAULT: Self = if cfg!(feature = "abort-on-oom") {
        Self::Abort
    } else {
        Self::Error
    };

    /// Parse from string (case-insensitive). Unknown values yield the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "return" | "throw" => Self::Error,
            "abort" | "terminate" | "exit" | "die" => Self::Abort,
            _ => Self::DEFAULT,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Abort => "abort",
        }
    }
}

impl Default for FailureMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-arena construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Blocks requested per refill (`nobjs`). Never below 1.
    pub chunk_objects: usize,
    /// Final-failure mode; `None` defers to [`failure_mode`].
    pub failure_mode: Option<FailureMode>,
    /// Capacity of the lifecycle event ring; 0 disables recording.
    pub event_capacity: usize,
}

impl ArenaConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_objects: DEFAULT_CHUNK_OBJECTS,
            failure_mode: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the blocks requested per refill.
    #[must_use]
    pub const fn with_chunk_objects(mut self, n: usize) -> Self {
        self.chunk_objects = if n == 0 { 1 } else { n };
        self
    }

    /// Pins the final-failure mode for this arena.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = Some(mode);
        self
    }

    /// Sets the lifecycle event ring capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Atomic cache: 0=unresolved, 1=Error, 2=Abort, 255=resolving.
// Resolution may run on an allocation failure path, so it never blocks.
static CACHED_MODE: AtomicU8 = AtomicU8::new(0);

const MODE_UNRESOLVED: u8 = 0;
const MODE_ERROR: u8 = 1;
const MODE_ABORT: u8 = 2;
const MODE_RESOLVING: u8 = 255;

fn mode_to_u8(mode: FailureMode) -> u8 {
    match mode {
        FailureMode::Error => MODE_ERROR,
        FailureMode::Abort => MODE_ABORT,
    }
}

fn u8_to_mode(v: u8) -> FailureMode {
    match v {
        MODE_ERROR => FailureMode::Error,
        MODE_ABORT => FailureMode::Abort,
        _ => FailureMode::DEFAULT,
    }
}

/// Process-wide failure mode (reads the environment once, then cached).
///
/// A concurrent caller that arrives while another thread is resolving gets the
/// build-time default rather than waiting.
#[must_use]
pub fn failure_mode() -> FailureMode {
    let cached = CACHED_MODE.load(Ordering::Relaxed);
    if cached != MODE_UNRESOLVED && cached != MODE_RESOLVING {
        return u8_to_mode(cached);
    }
    if cached == MODE_RESOLVING {
        return FailureMode::DEFAULT;
    }

    if CACHED_MODE
        .compare_exchange(
            MODE_UNRESOLVED,
            MODE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_MODE.load(Ordering::Relaxed);
        return if v != MODE_UNRESOLVED && v != MODE_RESOLVING {
            u8_to_mode(v)
        } else {
            FailureMode::DEFAULT
        };
    }

    let mode = std::env::var("NODEALLOC_OOM_MODE")
        .map(|v| FailureMode::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_modes() {
        assert_eq!(FailureMode::from_str_loose("error"), FailureMode::Error);
        assert_eq!(FailureMode::from_str_loose("RETURN"), FailureMode::Error);
        assert_eq!(FailureMode::from_str_loose("throw"), FailureMode::Error);
        assert_eq!(FailureMode::from_str_loose("abort"), FailureMode::Abort);
        assert_eq!(FailureMode::from_str_loose(" Terminate "), FailureMode::Abort);
        assert_eq!(FailureMode::from_str_loose("bogus"), FailureMode::DEFAULT);
    }

    #[test]
    fn default_follows_build_feature() {
        if cfg!(feature = "abort-on-oom") {
            assert_eq!(FailureMode::default(), FailureMode::Abort);
        } else {
            assert_eq!(FailureMode::default(), FailureMode::Error);
        }
    }

    #[test]
    fn config_builder() {
        let config = ArenaConfig::new()
            .with_chunk_objects(0)
            .with_failure_mode(FailureMode::Error)
            .with_event_capacity(4);
        assert_eq!(config.chunk_objects, 1);
        assert_eq!(config.failure_mode, Some(FailureMode::Error));
        assert_eq!(config.event_capacity, 4);
        assert_eq!(ArenaConfig::default().chunk_objects, DEFAULT_CHUNK_OBJECTS);
    }

    #[test]
    fn cached_mode_is_sticky() {
        let previous = CACHED_MODE.swap(MODE_ABORT, Ordering::SeqCst);
        assert_eq!(failure_mode(), FailureMode::Abort);
        CACHED_MODE.store(MODE_ERROR, Ordering::SeqCst);
        assert_eq!(failure_mode(), FailureMode::Error);
        CACHED_MODE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn resolving_state_returns_default() {
        let previous = CACHED_MODE.swap(MODE_RESOLVING, Ordering::SeqCst);
        assert_eq!(failure_mode(), FailureMode::DEFAULT);
        CACHED_MODE.store(previous, Ordering::SeqCst);
    }
}
