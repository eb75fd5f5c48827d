//! Multi-prompt delimited control over native machine stacks.
//!
//! A *prompt* delimits a region of the call stack. Code running under a
//! prompt can *yield* to it: control jumps back to where the prompt was
//! entered, carrying a first-class *resumption* that re-enters the
//! suspended code exactly where it left off. Prompts nest, yields target
//! any ancestor, and resumptions come in two flavors: at-most-once (free,
//! unboxed) and multi-shot (reference counted, lazily snapshotting the
//! suspended stacks so they can be replayed).
//!
//! ```text
//!   caller ──▶ prompt(f) ─────────────▶ f runs on a fresh stack
//!                 ▲                         │
//!                 │   yield_once(p, h, x)   │
//!                 └──── h(k, x) ◀───────────┘
//!                        │
//!                        └── k.resume(v) ──▶ yield returns v
//! ```
//!
//! Panics unwind transparently: a prompt whose body panics looks, from the
//! outside, like a function that panicked.
//!
//! # Example
//!
//! ```ignore
//! use std::ffi::c_void;
//! use switchback_core::{prompt, yield_once, Prompt, Resumption};
//!
//! unsafe fn body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
//!     // Ask the handler for a value and add one.
//!     let v = yield_once(p, handler, 10 as *mut c_void) as usize;
//!     (v + 1) as *mut c_void
//! }
//!
//! unsafe fn handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
//!     k.resume(arg) // hand the value straight back
//! }
//!
//! let result = unsafe { prompt(body, std::ptr::null_mut()) };
//! assert_eq!(result as usize, 11);
//! ```
//!
//! Values crossing a prompt boundary are erased to `*mut c_void`; the
//! layers above this one put types back on. Resumption handles move like
//! linear values: `resume` consumes them, dropping one releases the
//! suspended chain without running the destructors of its frames.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod backtrace;
pub mod engine;
pub mod error;
pub mod mresume;
pub mod prompt;
pub mod resumption;

use std::ffi::c_void;

pub use crate::backtrace::{backtrace as capture_backtrace, backtrace_with, CaptureFn};
pub use engine::{yield_multi, yield_once};
pub use error::ResumeError;
pub use prompt::{prompt_create, prompt_parent, prompt_top, Prompt};
pub use resumption::Resumption;
pub use switchback_stack::{
    flush_delayed, stats, thread_active_stacks, ConfigError, StackConfig, StackStats,
};

/// Body of a prompt started with [`prompt`]: receives its own prompt
/// pointer and the caller's argument.
pub type PromptFn = unsafe fn(*mut Prompt, *mut c_void) -> *mut c_void;

/// Body of a prompt created suspended with [`prompt_create`]: receives the
/// prompt, the creation-time argument and the first resume's argument.
pub type StartFn = unsafe fn(*mut Prompt, *mut c_void, *mut c_void) -> *mut c_void;

/// Handler invoked on the parent stack by a yield: receives the resumption
/// and the yield argument. Its return value becomes the result of the
/// resume that entered the prompt.
pub type YieldFn = unsafe fn(Resumption, *mut c_void) -> *mut c_void;

/// Install the stack configuration. Optional; defaults apply otherwise.
pub fn init(config: &StackConfig) -> Result<(), ConfigError> {
    switchback_stack::init(config)
}

/// Create a fresh prompt and run `fun(prompt, arg)` on its own growable
/// stack, returning the body's result.
///
/// If the body panics, the panic resumes in the caller after the prompt's
/// stack has been queued for release.
///
/// # Safety
///
/// `fun` must tolerate running on a small fresh stack that grows on
/// demand, and everything reachable from `arg` must stay valid for as long
/// as the body (or any resumption captured out of it) can run.
pub unsafe fn prompt(fun: PromptFn, arg: *mut c_void) -> *mut c_void {
    let r = prompt_create(start_shim, fun as usize as *mut c_void);
    unsafe { r.resume(arg) }
}

unsafe fn start_shim(p: *mut Prompt, sfun: *mut c_void, arg: *mut c_void) -> *mut c_void {
    let fun = unsafe { std::mem::transmute::<usize, PromptFn>(sfun as usize) };
    unsafe { fun(p, arg) }
}
