//! Error types and fatal-error reporting.
//!
//! There is exactly one recoverable error in the public API. Everything
//! else is either a fatal condition (allocation failure, which aborts after
//! a message) or library misuse, which debug builds catch with assertions
//! and release builds leave undefined.

/// Errors surfaced by resumption handle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeError {
    /// `dup` was called on a once resumption, which has no reference count
    /// to share. Yield with `yield_multi` to obtain a duplicable handle.
    DupOnce,
}

impl std::fmt::Display for ResumeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeError::DupOnce => {
                write!(f, "cannot dup a once resumption; use yield_multi instead")
            }
        }
    }
}

impl std::error::Error for ResumeError {}

/// Growable-stack allocation failed. Not recoverable.
pub(crate) fn fatal_stack_alloc() -> ! {
    eprintln!("switchback: fatal: unable to allocate a growable stack");
    std::process::abort()
}

/// A panic reached a prompt boundary while propagation is disabled.
pub(crate) fn fatal_panic_crossing() -> ! {
    eprintln!("switchback: fatal: panic reached a prompt boundary with exception propagation disabled");
    std::process::abort()
}
