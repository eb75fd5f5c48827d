//! Prompt objects and the per-thread prompt chain.
//!
//! A [`Prompt`] delimits one stack segment. At any moment a thread executes
//! on the stack of exactly one prompt (or on the plain OS stack, outside
//! any prompt); the prompts below it form a chain through `parent` links,
//! rooted in a thread-local top pointer.
//!
//! A prompt is in one of two states:
//!
//! - *active*: `top` is null and the prompt is reachable from the thread's
//!   top pointer through `parent` links.
//! - *suspended*: `top` points at the far end of its captured sub-chain and
//!   the prompt is not reachable from the top pointer. The prompts inside
//!   the captured sub-chain keep their own `top == null`; they are dormant
//!   with the capture, not independently suspended.
//!
//! The prompt header lives at the base of the prompt's own growable stack,
//! so creating a prompt costs one stack reservation and nothing else.

use std::cell::Cell;
use std::ffi::c_void;
use std::mem::{align_of, size_of};
use std::ptr;

use switchback_stack::Gstack;

use crate::engine::{ResumePoint, ReturnPoint};
use crate::error::fatal_stack_alloc;
use crate::resumption::Resumption;
use crate::StartFn;

/// A delimited stack segment that can be yielded to.
///
/// User code receives `*mut Prompt` from [`crate::prompt`] and passes it to
/// [`crate::yield_once`]/[`crate::yield_multi`] to transfer control to the
/// handler side of this prompt. The pointer stays valid while the prompt's
/// body runs.
pub struct Prompt {
    /// Next prompt down the active chain, toward the root. Null while
    /// suspended.
    pub(crate) parent: *mut Prompt,
    /// End of the captured sub-chain while suspended. Null while active.
    pub(crate) top: *mut Prompt,
    /// Non-atomic on purpose: prompts never leave their thread.
    pub(crate) refcount: isize,
    /// The stack this header lives at the base of.
    pub(crate) gstack: Gstack,
    /// Where yields and returns continue in the parent. Valid while active.
    pub(crate) return_point: *mut ReturnPoint,
    /// Where resumes continue on the suspended chain's stack. Valid while
    /// suspended, null before the first entry.
    pub(crate) resume_point: *mut ResumePoint,
    /// Set until the first entry consumes it.
    pub(crate) start_fun: Option<StartFn>,
    pub(crate) start_arg: *mut c_void,
    /// Per-stack unwind descriptor for hosts that need re-registration.
    pub(crate) unwind_frame: *mut c_void,
}

thread_local! {
    static PROMPT_TOP: Cell<*mut Prompt> = const { Cell::new(ptr::null_mut()) };
}

/// The prompt whose stack the thread currently executes on, or null outside
/// any prompt.
pub fn prompt_top() -> *mut Prompt {
    PROMPT_TOP.with(|top| top.get())
}

fn set_prompt_top(p: *mut Prompt) {
    PROMPT_TOP.with(|top| top.set(p));
}

/// Walk one step down the chain. With a null argument this starts the walk
/// by returning the current top.
///
/// # Safety
///
/// `p`, when non-null, must point at a live prompt owned by this thread.
pub unsafe fn prompt_parent(p: *mut Prompt) -> *mut Prompt {
    if p.is_null() {
        prompt_top()
    } else {
        unsafe { (*p).parent }
    }
}

/// An active prompt is part of the current stack chain.
pub(crate) unsafe fn is_active(p: *mut Prompt) -> bool {
    !p.is_null() && unsafe { (*p).top }.is_null()
}

/// Is `p` an ancestor of (or equal to) the current top?
pub(crate) unsafe fn is_ancestor(p: *mut Prompt) -> bool {
    let mut q = ptr::null_mut();
    loop {
        q = unsafe { prompt_parent(q) };
        if q.is_null() {
            return false;
        }
        if q == p {
            return true;
        }
    }
}

/// Allocate a fresh, suspended prompt that will run `fun(prompt, start_arg,
/// resume_arg)` when first resumed.
///
/// The returned once handle owns the prompt's single reference; dropping it
/// without resuming releases the stack.
pub fn prompt_create(fun: StartFn, start_arg: *mut c_void) -> Resumption {
    let Some(mut gstack) = Gstack::alloc() else {
        fatal_stack_alloc()
    };
    let header = gstack
        .reserve(size_of::<Prompt>(), align_of::<Prompt>().max(16))
        .cast::<Prompt>();
    unsafe {
        ptr::write(
            header,
            Prompt {
                parent: ptr::null_mut(),
                top: header,
                refcount: 1,
                gstack,
                return_point: ptr::null_mut(),
                resume_point: ptr::null_mut(),
                start_fun: Some(fun),
                start_arg,
                unwind_frame: ptr::null_mut(),
            },
        );
    }
    Resumption::once(header)
}

/// Link a suspended prompt onto the current chain and make its captured
/// sub-chain the new top.
///
/// A non-null `ret` becomes the prompt's return point (and the platform
/// unwinder is re-targeted at it); a null `ret` keeps the existing one, as
/// tail resumes do. Returns the prompt's resume point, null on first entry.
pub(crate) unsafe fn prompt_link(p: *mut Prompt, ret: *mut ReturnPoint) -> *mut ResumePoint {
    unsafe {
        debug_assert!(!is_active(p));
        (*p).parent = prompt_top();
        set_prompt_top((*p).top);
        (*p).top = ptr::null_mut();
        if !ret.is_null() {
            (*p).return_point = ret;
            switchback_stack::unwind_frame_update((*p).unwind_frame, &(*ret).jmp);
        } else {
            debug_assert!(!(*p).return_point.is_null());
        }
        debug_assert!(is_active(p));
        (*p).resume_point
    }
}

/// Unlink an active prompt (an ancestor of the current top), capturing the
/// chain above it, and make its parent the new top.
///
/// Returns the prompt's return point, leaving the field untouched so a tail
/// resume can reuse it.
pub(crate) unsafe fn prompt_unlink(p: *mut Prompt, res: *mut ResumePoint) -> *mut ReturnPoint {
    unsafe {
        debug_assert!(is_active(p));
        debug_assert!(is_ancestor(p));
        (*p).top = prompt_top();
        set_prompt_top((*p).parent);
        (*p).parent = ptr::null_mut();
        (*p).resume_point = res;
        debug_assert!(!is_active(p));
        (*p).return_point
    }
}

/// Take another reference to a prompt.
pub(crate) unsafe fn prompt_dup(p: *mut Prompt) -> *mut Prompt {
    unsafe {
        (*p).refcount += 1;
    }
    p
}

/// Release one reference, freeing the prompt and its captured sub-chain
/// when the count reaches zero.
pub(crate) unsafe fn prompt_drop(p: *mut Prompt) {
    unsafe { prompt_drop_with(p, false) }
}

/// As [`prompt_drop`], with the stack release deferred past the current
/// stack switch. Used when an exception is still on its way across the
/// prompt boundary being freed.
pub(crate) unsafe fn prompt_drop_with(p: *mut Prompt, delay: bool) {
    unsafe {
        let old = (*p).refcount;
        debug_assert!(old > 0, "prompt refcount underflow");
        (*p).refcount = old - 1;
        if old <= 1 {
            prompt_free(p, delay);
        }
    }
}

/// Free a suspended prompt chain, top first.
///
/// Every prompt in the captured sub-chain must be uniquely owned: at most
/// the chain itself plus one pending in-chain reference may remain, never
/// an independent outside owner. The walk releases every stack in the
/// chain; in-chain references die with the frames that held them.
///
/// A prompt whose count reaches zero while dormant *inside* someone else's
/// capture (`top` null, unreachable) is left alone here; the walk of the
/// chain that owns it releases its stack.
///
/// Each header lives inside the stack being released, so the stack handle
/// is read out before the mapping goes away.
unsafe fn prompt_free(head: *mut Prompt, delay: bool) {
    unsafe {
        let mut q = (*head).top;
        while !q.is_null() {
            debug_assert!((*q).refcount <= 1, "captured prompt not uniquely owned");
            let parent = (*q).parent;
            let gstack = ptr::read(ptr::addr_of!((*q).gstack));
            gstack.free(delay);
            q = parent;
        }
    }
}
