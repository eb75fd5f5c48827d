//! Growable stack reservation, reuse and release.
//!
//! A [`Gstack`] is a contiguous virtual-memory reservation the CPU stack
//! pointer can be switched onto. The stack grows downward from its base;
//! the region below is committed on demand by the OS, with an optional
//! guard page at the far end so overflow faults instead of corrupting a
//! neighboring mapping.
//!
//! Release is explicit ([`Gstack::free`]) rather than a `Drop` impl: the
//! owner's bookkeeping typically lives *inside* the region (carved with
//! [`Gstack::reserve`]), so the handle is read out of that memory before
//! the mapping disappears. A freed stack is parked in a small per-thread
//! cache for reuse; a *delayed* free is parked on a pending list and only
//! leaves it at the next allocation or an explicit [`flush_delayed`], for
//! callers that are still conceptually on their way off the stack.

use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::arch::Jmpbuf;
use crate::config;
use crate::ctx::{self, EntryFn};
use crate::gsave::Gsave;
use crate::stats;
use crate::sys;

/// A growable machine stack.
///
/// ```text
/// region                                          region_end
/// ├── guard ──┬────── on-demand pages ──────┬─ reserved ─┤
///             limit            stack grows ◀┤ base
/// ```
#[derive(Debug)]
pub struct Gstack {
    region: NonNull<u8>,
    region_size: usize,
    guard_size: usize,
    reserved: usize,
}

impl Gstack {
    /// Reserve a fresh stack, or reuse one released earlier on this thread.
    ///
    /// Returns `None` when the address space reservation fails. Pending
    /// delayed releases are flushed first; this is the safe point they wait
    /// for.
    pub fn alloc() -> Option<Gstack> {
        let cfg = config::current();
        CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            cache.flush_pending(&cfg);
            if let Some(mut gs) = cache.take_matching(&cfg) {
                gs.reserved = 0;
                stats::record_alloc(true);
                return Some(gs);
            }
            let gs = Gstack::fresh(&cfg)?;
            stats::record_alloc(false);
            Some(gs)
        })
    }

    fn fresh(cfg: &config::StackConfig) -> Option<Gstack> {
        let guard_size = if cfg.guard_pages { sys::page_size() } else { 0 };
        let usable = sys::page_align_up(cfg.reserve_size);
        let region_size = guard_size + usable;
        let region = sys::reserve(region_size)?;
        let usable_base = unsafe { region.as_ptr().add(guard_size) };
        if !sys::commit(usable_base, usable) {
            sys::release(region.as_ptr(), region_size);
            return None;
        }
        let gs = Gstack {
            region,
            region_size,
            guard_size,
            reserved: 0,
        };
        if !cfg.lazy_commit {
            // Pre-fault the hot end of the stack.
            let commit = cfg.initial_commit.min(usable);
            unsafe { std::ptr::write_bytes(gs.base().sub(commit), 0, commit) };
        }
        Some(gs)
    }

    /// Release the stack.
    ///
    /// With `delay` set the mapping survives until the next allocation on
    /// this thread (or [`flush_delayed`]), for use when the caller has not
    /// finished leaving the stack yet.
    pub fn free(self, delay: bool) {
        stats::record_free(delay);
        CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if delay {
                cache.pending.push(self);
            } else {
                cache.store_or_release(self, &config::current());
            }
        });
    }

    /// Carve `size` bytes (aligned to `align`) off the base of the stack.
    ///
    /// The memory reads as zeros and stays valid for the stack's lifetime.
    /// Carving moves the base downward, so it must happen before the stack
    /// is entered.
    pub fn reserve(&mut self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());
        let end = self.region.as_ptr() as usize + self.region_size;
        let ptr = (end - self.reserved - size) & !(align - 1);
        debug_assert!(ptr > self.limit() as usize);
        self.reserved = end - ptr;
        ptr as *mut u8
    }

    /// The base of the stack: the highest address execution can use, just
    /// below any reserved header area. Stacks grow down from here.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        let end = self.region.as_ptr() as usize + self.region_size;
        (end - self.reserved) as *mut u8
    }

    /// The lowest usable address, just above the guard page.
    #[inline]
    pub fn limit(&self) -> *mut u8 {
        unsafe { self.region.as_ptr().add(self.guard_size) }
    }

    /// Whether `addr` falls inside this stack's reservation.
    #[inline]
    pub fn contains(&self, addr: *const u8) -> bool {
        let lo = self.region.as_ptr() as usize;
        (addr as usize) >= lo && (addr as usize) < lo + self.region_size
    }

    /// Switch the CPU onto this stack and call `entry(env, unwind_frame)`,
    /// recording the current context in `save` first.
    ///
    /// Returns when `save` is continued; `entry` itself never returns.
    ///
    /// # Safety
    ///
    /// The stack must not be in use. `save` and `env` must stay valid while
    /// execution is away; see [`ctx::enter`].
    pub unsafe fn enter(&self, save: *mut Jmpbuf, entry: EntryFn, env: *mut c_void) {
        unsafe { ctx::enter(save, self.base(), env, entry) }
    }

    /// Snapshot the live bytes of this (suspended) stack, from `sp` up to
    /// the end of the region.
    ///
    /// The range covers any header area reserved at the base, so restoring
    /// replays the owner's bookkeeping along with the frames.
    ///
    /// # Safety
    ///
    /// `sp` must be the recorded stack pointer of a context suspended on
    /// this stack, so that the captured range is mapped and quiescent.
    pub unsafe fn save(&self, sp: *mut u8) -> Gsave {
        debug_assert!(self.contains(sp) || sp == self.base());
        let end = (self.region.as_ptr() as usize + self.region_size) as *mut u8;
        unsafe { Gsave::capture(sp, end) }
    }
}

// =============================================================================
// Per-thread reuse cache
// =============================================================================

struct StackCache {
    free: Vec<Gstack>,
    pending: Vec<Gstack>,
}

impl StackCache {
    fn flush_pending(&mut self, cfg: &config::StackConfig) {
        while let Some(gs) = self.pending.pop() {
            self.store_or_release(gs, cfg);
        }
    }

    fn store_or_release(&mut self, gs: Gstack, cfg: &config::StackConfig) {
        if self.free.len() < cfg.cache_count && gs.matches(cfg) {
            // Hand the physical pages back while the reservation waits.
            let usable = gs.region_size - gs.guard_size;
            sys::decommit(gs.limit(), usable);
            stats::record_cache_store();
            self.free.push(gs);
        } else {
            sys::release(gs.region.as_ptr(), gs.region_size);
        }
    }

    fn take_matching(&mut self, cfg: &config::StackConfig) -> Option<Gstack> {
        let idx = self.free.iter().position(|gs| gs.matches(cfg))?;
        Some(self.free.swap_remove(idx))
    }
}

impl Gstack {
    fn matches(&self, cfg: &config::StackConfig) -> bool {
        let guard = if cfg.guard_pages { sys::page_size() } else { 0 };
        self.guard_size == guard && self.region_size == guard + sys::page_align_up(cfg.reserve_size)
    }
}

impl Drop for StackCache {
    fn drop(&mut self) {
        for gs in self.free.drain(..).chain(self.pending.drain(..)) {
            sys::release(gs.region.as_ptr(), gs.region_size);
        }
    }
}

thread_local! {
    static CACHE: RefCell<StackCache> = RefCell::new(StackCache {
        free: Vec::new(),
        pending: Vec::new(),
    });
}

/// Physically release any stacks whose free was delayed on this thread.
pub fn flush_delayed() {
    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let cfg = config::current();
        cache.flush_pending(&cfg);
    });
}

// =============================================================================
// Tests
// =============================================================================
