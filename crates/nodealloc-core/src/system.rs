//! System allocator adapter.
//!
//! The arena never calls the host allocator directly. It goes through a
//! [`RawSource`] (the raw acquisition primitive) wrapped by an adapter that
//! owns the out-of-memory handler and the final-failure policy:
//!
//! - `acquire` makes exactly one attempt.
//! - `acquire_or_die` takes over after a failed `acquire`: it runs the OOM
//!   handler and retries until memory appears, and fails (error or abort, per
//!   `FailureMode`) as soon as no handler is installed.

#![allow(unsafe_code)]

use core::ptr::NonNull;
use std::alloc::Layout;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, const_mutex};

use crate::config::{self, ArenaConfig, FailureMode};
use crate::error::AllocError;
use crate::log::{ArenaEventKind, EventFields, EventLog};
use crate::metrics::ArenaMetrics;

/// Alignment guaranteed by the bundled sources.
pub const SOURCE_ALIGN: usize = 16;

/// Callback run when the system source is exhausted.
///
/// Its only useful effects are releasing memory elsewhere and returning, or not
/// returning at all. It runs with the arena lock held and must not allocate
/// from or deallocate to the same arena. Swapping the installed handler from
/// inside it is allowed.
pub type OomHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Raw memory acquisition primitive.
///
/// Returned regions must be aligned to at least `size_class::ALIGN`.
pub trait RawSource {
    /// Makes a single attempt to obtain `bytes` bytes.
    fn acquire(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Returns a region obtained from `acquire`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this source with the same `bytes`, and must not be
    /// used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize);

    /// Resizes a region, preserving `min(old_bytes, new_bytes)` leading bytes.
    ///
    /// On `None` the original region is untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawSource::release`] for `ptr` and `old_bytes`.
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        let fresh = self.acquire(new_bytes)?;
        // SAFETY: both regions are live, distinct, and at least this long.
        unsafe {
            core::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                fresh.as_ptr(),
                old_bytes.min(new_bytes),
            );
            self.release(ptr, old_bytes);
        }
        Some(fresh)
    }
}

impl<S: RawSource + ?Sized> RawSource for &S {
    fn acquire(&self, bytes: usize) -> Option<NonNull<u8>> {
        (**self).acquire(bytes)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded contract.
        unsafe { (**self).release(ptr, bytes) }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { (**self).resize(ptr, old_bytes, new_bytes) }
    }
}

// ---------------------------------------------------------------------------
// Bundled sources
// ---------------------------------------------------------------------------

/// The C library heap (`malloc` / `free` / `realloc`).
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Malloc;

#[cfg(unix)]
impl Malloc {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl RawSource for Malloc {
    fn acquire(&self, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: plain libc allocation; null is mapped to None.
        let ptr = unsafe { libc::malloc(bytes) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _bytes: usize) {
        // SAFETY: ptr came from malloc/realloc per the trait contract.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        _old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: ptr came from malloc/realloc; on failure realloc leaves it intact.
        let out = unsafe { libc::realloc(ptr.as_ptr().cast(), new_bytes) };
        NonNull::new(out.cast::<u8>())
    }
}

/// The Rust global allocator, at `SOURCE_ALIGN` alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdHeap;

impl StdHeap {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn layout(bytes: usize) -> Option<Layout> {
        Layout::from_size_align(bytes.max(1), SOURCE_ALIGN).ok()
    }
}

impl RawSource for StdHeap {
    fn acquire(&self, bytes: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(bytes)?;
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize) {
        if let Some(layout) = Self::layout(bytes) {
            // SAFETY: ptr was allocated with this exact layout.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        let old = Self::layout(old_bytes)?;
        Self::layout(new_bytes)?;
        // SAFETY: ptr was allocated with `old`; new size was validated above.
        NonNull::new(unsafe { std::alloc::realloc(ptr.as_ptr(), old, new_bytes.max(1)) })
    }
}

/// Source used when none is named.
#[cfg(unix)]
pub type DefaultSource = Malloc;
/// Source used when none is named.
#[cfg(not(unix))]
pub type DefaultSource = StdHeap;

/// Shared, grantable byte allowance.
#[derive(Debug, Clone)]
pub struct Budget(Arc<AtomicUsize>);

impl Budget {
    /// Creates an allowance of `bytes`.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(bytes)))
    }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Adds `bytes` to the allowance, saturating at `usize::MAX`. Returns the
    /// new allowance.
    pub fn grant(&self, bytes: usize) -> usize {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(bytes);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Removes everything that is left.
    pub fn exhaust(&self) {
        self.0.store(0, Ordering::Release);
    }

    fn try_take(&self, bytes: usize) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(bytes))
            .is_ok()
    }
}

/// Source that refuses requests once its [`Budget`] is spent.
///
/// Released regions return their bytes to the budget. Useful to drive the
/// exhaustion paths deterministically.
#[derive(Debug, Clone)]
pub struct BudgetedSource<S> {
    inner: S,
    budget: Budget,
}

impl<S: RawSource> BudgetedSource<S> {
    /// Wraps `inner`, charging every acquisition against `budget`.
    #[must_use]
    pub fn new(inner: S, budget: Budget) -> Self {
        Self { inner, budget }
    }

    /// Handle to the shared allowance.
    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }
}

impl<S: RawSource> RawSource for BudgetedSource<S> {
    fn acquire(&self, bytes: usize) -> Option<NonNull<u8>> {
        if !self.budget.try_take(bytes) {
            return None;
        }
        let out = self.inner.acquire(bytes);
        if out.is_none() {
            self.budget.grant(bytes);
        }
        out
    }

    unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.release(ptr, bytes) };
        self.budget.grant(bytes);
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        let growth = new_bytes.saturating_sub(old_bytes);
        if growth > 0 && !self.budget.try_take(growth) {
            return None;
        }
        // SAFETY: forwarded contract.
        let out = unsafe { self.inner.resize(ptr, old_bytes, new_bytes) };
        let refund = match out {
            Some(_) => old_bytes.saturating_sub(new_bytes),
            None => growth,
        };
        self.budget.grant(refund);
        out
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Raw source plus OOM handler, failure policy and telemetry.
pub(crate) struct SystemAdapter<S> {
    source: S,
    oom_handler: Mutex<Option<OomHandler>>,
    failure_mode: Option<FailureMode>,
    metrics: ArenaMetrics,
    events: Mutex<EventLog>,
}

impl<S: RawSource> SystemAdapter<S> {
    pub(crate) const fn new(source: S, config: &ArenaConfig) -> Self {
        Self {
            source,
            oom_handler: const_mutex(None),
            failure_mode: config.failure_mode,
            metrics: ArenaMetrics::new(),
            events: const_mutex(EventLog::new(config.event_capacity)),
        }
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn metrics(&self) -> &ArenaMetrics {
        &self.metrics
    }

    pub(crate) fn events(&self) -> &Mutex<EventLog> {
        &self.events
    }

    pub(crate) fn record(&self, kind: ArenaEventKind, fields: EventFields) {
        self.events.lock().record(kind, fields);
    }

    /// One attempt, no handler, no failure policy.
    #[inline]
    pub(crate) fn acquire(&self, bytes: usize) -> Option<NonNull<u8>> {
        self.source.acquire(bytes)
    }

    /// Continues after a failed [`Self::acquire`] of `bytes`: runs the OOM
    /// handler, then tries again, until an attempt succeeds or no handler is
    /// installed.
    ///
    /// `heap_bytes` is only used to annotate lifecycle records.
    pub(crate) fn acquire_or_die(
        &self,
        bytes: usize,
        heap_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        loop {
            self.run_oom_handler(bytes, heap_bytes)?;
            if let Some(ptr) = self.source.acquire(bytes) {
                return Ok(ptr);
            }
        }
    }

    /// One resize attempt.
    ///
    /// # Safety
    ///
    /// See [`RawSource::resize`].
    #[inline]
    pub(crate) unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { self.source.resize(ptr, old_bytes, new_bytes) }
    }

    /// Continues after a failed [`Self::resize`] the same way
    /// [`Self::acquire_or_die`] does.
    ///
    /// # Safety
    ///
    /// See [`RawSource::resize`].
    pub(crate) unsafe fn resize_or_die(
        &self,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
        heap_bytes: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        loop {
            self.run_oom_handler(new_bytes, heap_bytes)?;
            // SAFETY: forwarded; a failed attempt leaves ptr owned by the caller.
            if let Some(out) = unsafe { self.source.resize(ptr, old_bytes, new_bytes) } {
                return Ok(out);
            }
        }
    }

    /// Returns a region to the source.
    ///
    /// # Safety
    ///
    /// See [`RawSource::release`].
    #[inline]
    pub(crate) unsafe fn release(&self, ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.source.release(ptr, bytes) }
    }

    /// Swaps the OOM handler, returning the previous one.
    pub(crate) fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        std::mem::replace(&mut *self.oom_handler.lock(), handler)
    }

    /// Runs the installed handler, or takes the failure path if there is none.
    fn run_oom_handler(&self, bytes: usize, heap_bytes: usize) -> Result<(), AllocError> {
        // Clone out so the handler runs without the handler slot locked.
        let handler = self.oom_handler.lock().clone();
        let Some(handler) = handler else {
            return Err(self.fail(bytes, heap_bytes));
        };
        ArenaMetrics::inc(&self.metrics.oom_handler_calls);
        self.record(
            ArenaEventKind::OomHandlerInvoked,
            EventFields::new(heap_bytes, "retry").bytes(bytes),
        );
        handler();
        Ok(())
    }

    /// Final exhaustion: error or process abort.
    fn fail(&self, bytes: usize, heap_bytes: usize) -> AllocError {
        ArenaMetrics::inc(&self.metrics.out_of_memory);
        let mode = self.failure_mode.unwrap_or_else(config::failure_mode);
        self.record(
            ArenaEventKind::OutOfMemory,
            EventFields::new(heap_bytes, mode.as_str()).bytes(bytes),
        );
        match mode {
            FailureMode::Error => AllocError::OutOfMemory { requested: bytes },
            FailureMode::Abort => {
                eprintln!("nodealloc: out of memory ({bytes} bytes requested)");
                std::process::abort()
            }
        }
    }
}
