//! Growable machine stacks for delimited control.
//!
//! This crate provides the memory and machine-state services that the
//! `switchback_core` control engine is built on:
//!
//! - **Growable stacks** ([`Gstack`]): large reserved virtual-memory regions
//!   that the OS pages in on demand, with an optional guard page below the
//!   stack and a small per-thread reuse cache.
//! - **Register contexts** ([`Jmpbuf`], [`ctx`]): save the callee-saved
//!   machine state at a point and later continue from it on a chosen stack.
//! - **Stack snapshots** ([`Gsave`]): copy-out and copy-back of the live
//!   bytes of a suspended stack, used to run the same continuation more
//!   than once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Gstack region                       │
//! ├────────────┬───────────────────────────────┬─────────────┤
//! │ guard page │   stack grows down  ◀──────   │ header area │
//! │ (PROT_NONE)│                               │ (reserve)   │
//! └────────────┴───────────────────────────────┴─────────────┘
//! limit                                        base       end
//! ```
//!
//! The header area at the base is carved out with [`Gstack::reserve`] so a
//! caller can co-locate its per-stack bookkeeping with the stack itself and
//! avoid a separate allocation.
//!
//! # Platform support
//!
//! Unix ELF hosts on x86_64 and aarch64. The context-switch primitives are
//! hand-written assembly per architecture; other targets are rejected at
//! compile time.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(unix))]
compile_error!("switchback_stack requires a unix host (mmap-based stack reservation)");

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("switchback_stack supports x86_64 and aarch64 only");

#[cfg(target_vendor = "apple")]
compile_error!("switchback_stack supports ELF hosts only (no Mach-O symbol mangling)");

pub mod arch;
pub mod config;
pub mod ctx;
pub mod gsave;
pub mod gstack;
pub mod stats;

mod sys;

pub use arch::Jmpbuf;
pub use config::{ConfigError, StackConfig};
pub use gsave::Gsave;
pub use gstack::{flush_delayed, Gstack};
pub use stats::{stats, thread_active_stacks, StackStats};

/// Install the stack configuration. Call once, before the first allocation.
///
/// Later calls replace the configuration for stacks not yet allocated;
/// stacks already handed out keep the geometry they were created with.
pub fn init(config: &StackConfig) -> Result<(), ConfigError> {
    config.validate()?;
    config::install(config.clone());
    Ok(())
}

/// Re-target the platform unwinder after a stack switch.
///
/// On hosts whose exception dispatcher consults per-thread frame
/// registration lists this must re-associate `frame` with the jump buffer
/// that now leads out of the stack. ELF unwinding is table-driven and needs
/// no re-registration, so this is a no-op here; it is kept as the seam the
/// control engine calls every time a stack is linked under a new return
/// point.
#[inline]
pub fn unwind_frame_update(frame: *mut core::ffi::c_void, jmp: *const Jmpbuf) {
    let _ = (frame, jmp);
}
