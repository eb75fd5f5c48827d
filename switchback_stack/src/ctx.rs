//! Register-context save, continue and stack-entry primitives.
//!
//! These are paired transfer operations rather than a setjmp/longjmp split:
//! a single call both records the current machine state and continues a
//! target. The call then *returns* when some later [`transfer`] or [`jump`]
//! targets the recorded context. Every live value at the call boundary is
//! either in a callee-saved register (restored from the buffer) or in the
//! frame (reached through the restored stack pointer), so continuing a
//! context is indistinguishable from the original call returning.
//!
//! A context may be continued more than once. Re-continuation runs the code
//! after the call again with identical register state; the caller is
//! responsible for keeping the frame's memory in a re-executable state
//! between continuations.

use core::ffi::c_void;

use crate::arch::Jmpbuf;

/// Signature of the function invoked on a fresh stack by [`enter`].
///
/// Receives the caller's environment pointer and an opaque per-stack unwind
/// descriptor (null on hosts that need none). Must never return; the only
/// ways off the stack are [`transfer`] and [`jump`].
pub type EntryFn = unsafe extern "C" fn(env: *mut c_void, unwind_frame: *mut c_void) -> !;

extern "C" {
    fn sb_ctx_transfer(save: *mut Jmpbuf, to: *const Jmpbuf);
    fn sb_ctx_jump(to: *const Jmpbuf) -> !;
    fn sb_ctx_enter(save: *mut Jmpbuf, sp: *mut u8, env: *mut c_void, entry: EntryFn);
}

/// Save the current context into `save` and continue `to`.
///
/// Returns when `save` is itself continued.
///
/// # Safety
///
/// `to` must hold a context previously recorded by [`transfer`] or
/// [`enter`], whose stack is still mapped and not concurrently in use.
/// `save` must point to writable memory that outlives the suspension.
#[inline]
pub unsafe fn transfer(save: *mut Jmpbuf, to: *const Jmpbuf) {
    unsafe { sb_ctx_transfer(save, to) }
}

/// Continue `to` without saving the current context.
///
/// The current stack position is abandoned; frames between here and
/// wherever `to` resumes are never returned into and their destructors do
/// not run.
///
/// # Safety
///
/// Same requirements on `to` as [`transfer`].
#[inline]
pub unsafe fn jump(to: *const Jmpbuf) -> ! {
    unsafe { sb_ctx_jump(to) }
}

/// Save the current context into `save`, switch the CPU onto the stack
/// topped by `sp` and call `entry(env, unwind_frame)`.
///
/// Returns when `save` is continued. `entry` itself never returns.
///
/// # Safety
///
/// `sp` must be the aligned top of a mapped stack region with nothing live
/// on it. `env` must remain valid until `entry` has consumed it.
#[inline]
pub unsafe fn enter(save: *mut Jmpbuf, sp: *mut u8, env: *mut c_void, entry: EntryFn) {
    unsafe { sb_ctx_enter(save, sp, env, entry) }
}
