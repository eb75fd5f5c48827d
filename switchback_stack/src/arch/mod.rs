//! Per-architecture register-context layout and assembly.
//!
//! Each architecture module defines the [`Jmpbuf`] layout (callee-saved
//! registers, stack pointer, continuation address, floating-point control
//! state) and the three assembly entry points the [`crate::ctx`] wrappers
//! bind to:
//!
//! - `sb_ctx_transfer`: save the current context, continue a saved one.
//! - `sb_ctx_jump`: continue a saved context without saving.
//! - `sb_ctx_enter`: save the current context, switch onto a fresh stack
//!   and call an entry function that must never return.
//!
//! Only callee-saved state is captured. Caller-saved registers are dead
//! across any call boundary, so a context produced mid-function by
//! `sb_ctx_transfer` is exactly as resumable as a return address.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::Jmpbuf;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::Jmpbuf;
