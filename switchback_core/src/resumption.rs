//! Resumption handles and their tag encoding.
//!
//! A resumption is one pointer-sized word. Bit 2 distinguishes the two
//! kinds, so the common at-most-once case needs no allocation at all:
//!
//! ```text
//! ┌──────────────────────────────┬─────┐
//! │ Prompt*                      │ 000 │  once handle
//! ├──────────────────────────────┼─────┤
//! │ MultiResumption*             │ 100 │  multi handle
//! └──────────────────────────────┴─────┘
//! ```
//!
//! Both pointees are at least 8-byte aligned (checked below), so the tag
//! bits are always free.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use crate::engine::{prompt_resume, prompt_resume_tail};
use crate::error::ResumeError;
use crate::mresume::{self, MultiResumption};
use crate::prompt::{prompt_drop, Prompt};

const MULTI_TAG: usize = 0b100;

const _: () = {
    assert!(std::mem::align_of::<Prompt>() >= 8);
    assert!(std::mem::align_of::<MultiResumption>() >= 8);
};

enum Handle {
    Once(*mut Prompt),
    Multi(*mut MultiResumption),
}

/// A first-class handle to a suspended prompt chain.
///
/// Resuming transfers control back into the suspended code; dropping the
/// handle releases the chain instead, discarding its frames without running
/// their destructors. A once handle (from [`crate::yield_once`] or
/// [`crate::prompt_create`]) owns the prompt's single reference; a multi
/// handle (from [`crate::yield_multi`]) is reference counted and can be
/// [`dup`](Resumption::dup)ed.
pub struct Resumption {
    raw: NonNull<c_void>,
}

impl Resumption {
    pub(crate) fn once(p: *mut Prompt) -> Self {
        debug_assert!(!p.is_null() && p as usize & MULTI_TAG == 0);
        Self {
            raw: unsafe { NonNull::new_unchecked(p.cast::<c_void>()) },
        }
    }

    pub(crate) fn multi(r: *mut MultiResumption) -> Self {
        debug_assert!(!r.is_null() && r as usize & MULTI_TAG == 0);
        Self {
            raw: unsafe { NonNull::new_unchecked((r as usize | MULTI_TAG) as *mut c_void) },
        }
    }

    fn classify(&self) -> Handle {
        let bits = self.raw.as_ptr() as usize;
        if bits & MULTI_TAG == 0 {
            Handle::Once(bits as *mut Prompt)
        } else {
            Handle::Multi((bits ^ MULTI_TAG) as *mut MultiResumption)
        }
    }

    /// Resume the suspended chain with `arg`, consuming the handle.
    ///
    /// Returns what the resumed prompt next produces: its body's return
    /// value, or the value of its next yield's handler.
    ///
    /// # Safety
    ///
    /// Must be called on the thread the chain was captured on, from outside
    /// the suspended chain itself. The prompt this chain was captured from
    /// must not have returned in the meantime.
    pub unsafe fn resume(self, arg: *mut c_void) -> *mut c_void {
        let this = ManuallyDrop::new(self);
        match this.classify() {
            Handle::Once(p) => unsafe {
                debug_assert_eq!((*p).refcount, 1);
                debug_assert!(!(*p).resume_point.is_null() || (*p).start_fun.is_some());
                prompt_resume(p, arg)
            },
            Handle::Multi(r) => unsafe { mresume::mresume(r, arg) },
        }
    }

    /// Resume in tail position, reusing the return point of the resume that
    /// created this handle instead of growing the parent stack.
    ///
    /// A chain of handlers that only ever `resume_tail` each other runs in
    /// constant parent-stack space regardless of length.
    ///
    /// # Safety
    ///
    /// As [`resume`](Resumption::resume). Additionally the original
    /// resume's frame must still be in scope on the parent stack; resuming
    /// in tail position after that frame has been exited is undefined. On a
    /// multi handle only the first resume keeps the tail property.
    pub unsafe fn resume_tail(self, arg: *mut c_void) -> *mut c_void {
        let this = ManuallyDrop::new(self);
        match this.classify() {
            Handle::Once(p) => unsafe { prompt_resume_tail(p, arg, (*p).return_point) },
            Handle::Multi(r) => unsafe { mresume::mresume_tail(r, arg) },
        }
    }

    /// Take another handle to the same multi-shot resumption.
    ///
    /// Fails on once handles, which have no reference count to share.
    pub fn dup(&self) -> Result<Resumption, ResumeError> {
        match self.classify() {
            Handle::Once(_) => Err(ResumeError::DupOnce),
            Handle::Multi(r) => {
                unsafe { mresume::mresume_dup(r) };
                Ok(Resumption::multi(r))
            }
        }
    }

    /// How many times this resumption has been resumed. Always 0 for a once
    /// handle.
    pub fn resume_count(&self) -> u64 {
        match self.classify() {
            Handle::Once(_) => 0,
            Handle::Multi(r) => unsafe { mresume::resume_count(r) },
        }
    }

    /// True for a uniquely held multi handle that was never resumed: the
    /// one case where a caller may want to short-circuit into a
    /// cleanup-only resume instead of a full one.
    pub fn should_unwind(&self) -> bool {
        match self.classify() {
            Handle::Once(_) => false,
            Handle::Multi(r) => unsafe { mresume::refcount(r) == 1 && mresume::resume_count(r) == 0 },
        }
    }
}

impl Drop for Resumption {
    fn drop(&mut self) {
        match self.classify() {
            Handle::Once(p) => unsafe { prompt_drop(p) },
            Handle::Multi(r) => unsafe { mresume::mresume_drop(r) },
        }
    }
}

impl std::fmt::Debug for Resumption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.classify() {
            Handle::Once(p) => write!(f, "Resumption::Once({:p})", p),
            Handle::Multi(r) => write!(f, "Resumption::Multi({:p})", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        let p = 0x1000 as *mut Prompt;
        let once = ManuallyDrop::new(Resumption::once(p));
        match once.classify() {
            Handle::Once(q) => assert_eq!(q, p),
            Handle::Multi(_) => panic!("once handle classified as multi"),
        }

        let r = 0x2000 as *mut MultiResumption;
        let multi = ManuallyDrop::new(Resumption::multi(r));
        match multi.classify() {
            Handle::Multi(q) => assert_eq!(q, r),
            Handle::Once(_) => panic!("multi handle classified as once"),
        }
    }

    #[test]
    fn dup_of_once_is_rejected() {
        let p = 0x1000 as *mut Prompt;
        let once = ManuallyDrop::new(Resumption::once(p));
        assert_eq!(once.dup().unwrap_err(), ResumeError::DupOnce);
        assert_eq!(once.resume_count(), 0);
        assert!(!once.should_unwind());
    }
}
