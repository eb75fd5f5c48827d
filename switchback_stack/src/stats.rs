//! Stack allocation statistics.
//!
//! Global totals are atomics and cheap to bump from any thread. The live
//! count is additionally tracked per thread: stacks never migrate between
//! threads, so the per-thread counter is exact and is what tests observe.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing stack allocator activity.
#[derive(Debug)]
pub struct StackStats {
    /// Stacks handed out, including cache reuses.
    pub stacks_allocated: AtomicU64,
    /// Stacks released by their owner.
    pub stacks_freed: AtomicU64,
    /// Allocations served from the per-thread reuse cache.
    pub cache_hits: AtomicU64,
    /// Releases parked in the per-thread reuse cache.
    pub cache_stores: AtomicU64,
    /// Releases deferred past a stack switch.
    pub delayed_frees: AtomicU64,
    /// Stack snapshots taken for multi-shot resumption.
    pub snapshots_taken: AtomicU64,
    /// Stack snapshots copied back.
    pub snapshots_restored: AtomicU64,
}

impl StackStats {
    const fn new() -> Self {
        Self {
            stacks_allocated: AtomicU64::new(0),
            stacks_freed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_stores: AtomicU64::new(0),
            delayed_frees: AtomicU64::new(0),
            snapshots_taken: AtomicU64::new(0),
            snapshots_restored: AtomicU64::new(0),
        }
    }

    /// Stacks currently live across all threads.
    pub fn live_stacks(&self) -> u64 {
        self.stacks_allocated
            .load(Ordering::Relaxed)
            .saturating_sub(self.stacks_freed.load(Ordering::Relaxed))
    }
}

static STATS: StackStats = StackStats::new();

/// Global allocator statistics.
pub fn stats() -> &'static StackStats {
    &STATS
}

thread_local! {
    static THREAD_LIVE: Cell<usize> = const { Cell::new(0) };
}

/// Stacks currently live on the calling thread.
pub fn thread_active_stacks() -> usize {
    THREAD_LIVE.with(|live| live.get())
}

pub(crate) fn record_alloc(from_cache: bool) {
    STATS.stacks_allocated.fetch_add(1, Ordering::Relaxed);
    if from_cache {
        STATS.cache_hits.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_LIVE.with(|live| live.set(live.get() + 1));
}

pub(crate) fn record_free(delayed: bool) {
    STATS.stacks_freed.fetch_add(1, Ordering::Relaxed);
    if delayed {
        STATS.delayed_frees.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_LIVE.with(|live| {
        debug_assert!(live.get() > 0, "stack freed on a thread that owns none");
        live.set(live.get() - 1);
    });
}

pub(crate) fn record_cache_store() {
    STATS.cache_stores.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_snapshot() {
    STATS.snapshots_taken.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_restore() {
    STATS.snapshots_restored.fetch_add(1, Ordering::Relaxed);
}
