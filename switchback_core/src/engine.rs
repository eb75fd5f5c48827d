//! The control-transfer engine.
//!
//! Four transitions move control between a prompt and its parent stack:
//!
//! ```text
//!   parent stack                        prompt stack
//!   ────────────                        ────────────
//!   prompt_resume ── PI (first entry) ─▶ entry trampoline
//!                 ── PR (re-entry)    ─▶ yield point (Y)
//!   dispatch (P) ◀── RET / EXC / YR  ─── trampoline return / yield
//! ```
//!
//! Every transition is one register-context transfer. The resuming side
//! records a [`ReturnPoint`] on its own frame and continues the prompt; the
//! prompt side comes back by continuing that return point, after filling in
//! what kind of arrival it is (a value, a yield to run a handler, or a
//! panic to re-raise). The yielding side symmetrically records a
//! [`ResumePoint`] on the prompt's stack, which a later resume continues.
//!
//! A return point may be continued more than once: the tail-resume path
//! deliberately reuses the original one so that arbitrarily long chains of
//! handler and prompt bouncing off each other run in constant parent-stack
//! space. The dispatch below therefore derives all its state from the
//! return point and the prompt pointer alone.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr;

use switchback_stack::{config, ctx, Jmpbuf};

use crate::error::fatal_panic_crossing;
use crate::mresume::MultiResumption;
use crate::prompt::{
    is_active, is_ancestor, prompt_drop, prompt_drop_with, prompt_link, prompt_unlink, Prompt,
};
use crate::resumption::Resumption;
use crate::YieldFn;

/// What an arrival at a [`ReturnPoint`] means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnKind {
    /// The prompt body returned normally; `arg` is the result.
    Return,
    /// The prompt body panicked; `exception` carries the payload.
    Exception,
    /// Yield with an at-most-once resumption.
    YieldOnce,
    /// Yield with a multi-shot resumption.
    YieldMulti,
}

/// Allocated on the resuming (parent) frame; continued by the prompt on
/// yield, return and panic.
pub(crate) struct ReturnPoint {
    pub(crate) jmp: Jmpbuf,
    pub(crate) kind: ReturnKind,
    pub(crate) fun: Option<YieldFn>,
    pub(crate) arg: *mut c_void,
    pub(crate) exception: Option<Box<dyn Any + Send>>,
}

impl ReturnPoint {
    fn new() -> Self {
        Self {
            jmp: Jmpbuf::zeroed(),
            kind: ReturnKind::Return,
            fun: None,
            arg: ptr::null_mut(),
            exception: None,
        }
    }
}

/// Allocated on the yielding frame (the prompt's stack); continued by a
/// later resume, which stores the resume argument in `result` first.
pub(crate) struct ResumePoint {
    pub(crate) jmp: Jmpbuf,
    pub(crate) result: *mut c_void,
}

// =============================================================================
// Entering a prompt
// =============================================================================

struct EntryEnv {
    prompt: *mut Prompt,
    arg: *mut c_void,
}

/// First code to run on a fresh prompt stack.
///
/// Runs the start function under a panic guard, then leaves the stack for
/// good by continuing the parent's return point with either the result or
/// the caught panic payload. Never returns.
unsafe extern "C" fn prompt_stack_entry(envp: *mut c_void, unwind_frame: *mut c_void) -> ! {
    let (p, arg, fun, start_arg) = unsafe {
        let env = &*(envp as *mut EntryEnv);
        let p = env.prompt;
        (*p).unwind_frame = unwind_frame;
        let Some(fun) = (*p).start_fun.take() else {
            unreachable!("prompt entered twice through its start function")
        };
        (p, env.arg, fun, (*p).start_arg)
    };
    match catch_unwind(AssertUnwindSafe(|| unsafe { fun(p, start_arg, arg) })) {
        Ok(value) => unsafe {
            // RET: continue the parent with the result.
            let ret = prompt_unlink(p, ptr::null_mut());
            (*ret).kind = ReturnKind::Return;
            (*ret).fun = None;
            (*ret).arg = value;
            ctx::jump(&(*ret).jmp)
        },
        Err(payload) => unsafe {
            // EXC: tunnel the panic through the boundary.
            if !config::current().exception_propagation {
                fatal_panic_crossing()
            }
            let ret = prompt_unlink(p, ptr::null_mut());
            (*ret).kind = ReturnKind::Exception;
            (*ret).fun = None;
            (*ret).arg = ptr::null_mut();
            (*ret).exception = Some(payload);
            ctx::jump(&(*ret).jmp)
        },
    }
}

// =============================================================================
// Arrival dispatch (transition P)
// =============================================================================

/// Act on an arrival at `ret`: hand out the result, run the yielded
/// handler, or re-raise a tunneled panic.
///
/// Kept out of line so the continuation after the context transfer in
/// [`prompt_resume`] is a single idempotent call; tail resumes re-run it
/// with the frame in exactly the state the first arrival saw.
#[inline(never)]
unsafe fn exec_yield_fun(ret: *mut ReturnPoint, p: *mut Prompt) -> *mut c_void {
    unsafe {
        debug_assert!(!is_active(p));
        match (*ret).kind {
            ReturnKind::YieldOnce => {
                let Some(fun) = (*ret).fun.take() else {
                    unreachable!("yield without a handler")
                };
                fun(Resumption::once(p), (*ret).arg)
            }
            ReturnKind::Return => {
                let result = (*ret).arg;
                prompt_drop(p);
                result
            }
            ReturnKind::YieldMulti => {
                let Some(fun) = (*ret).fun.take() else {
                    unreachable!("yield without a handler")
                };
                let r = MultiResumption::allocate(p);
                fun(Resumption::multi(r), (*ret).arg)
            }
            ReturnKind::Exception => {
                let Some(payload) = (*ret).exception.take() else {
                    unreachable!("exception arrival without a payload")
                };
                // The stack we are unwinding away from is released past the
                // switch, not under our feet.
                prompt_drop_with(p, true);
                resume_unwind(payload)
            }
        }
    }
}

// =============================================================================
// Resume
// =============================================================================

/// Enter or re-enter a suspended prompt, returning what its body returns or
/// what its next yield's handler returns.
#[inline(never)]
pub(crate) unsafe fn prompt_resume(p: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let mut ret = ReturnPoint::new();
    unsafe {
        debug_assert!((*p).parent.is_null());
        let res = prompt_link(p, &mut ret);
        if !res.is_null() {
            // PR: continue at the recorded yield point.
            (*res).result = arg;
            ctx::transfer(&mut ret.jmp, &(*res).jmp);
        } else {
            // PI: first entry, switch onto the fresh stack.
            let mut env = EntryEnv { prompt: p, arg };
            (&(*p).gstack).enter(
                &mut ret.jmp,
                prompt_stack_entry,
                ptr::addr_of_mut!(env).cast::<c_void>(),
            );
        }
        // P: the prompt yielded or returned back to this frame.
        exec_yield_fun(ptr::addr_of_mut!(ret), p)
    }
}

/// Resume a suspended prompt by continuing its yield point through an
/// existing return point instead of recording a fresh one.
///
/// Arrivals at `ret` rewind the parent stack to the frame that originally
/// recorded it, so mutually tail-resuming handlers run in constant
/// parent-stack space. Never actually returns to its caller; the value
/// flows out of the reused return point's dispatch.
pub(crate) unsafe fn prompt_resume_tail(
    p: *mut Prompt,
    arg: *mut c_void,
    ret: *mut ReturnPoint,
) -> *mut c_void {
    unsafe {
        debug_assert!((*p).refcount >= 1);
        debug_assert!(!(*p).resume_point.is_null());
        let res = prompt_link(p, ret);
        (*res).result = arg;
        ctx::jump(&(*res).jmp)
    }
}

// =============================================================================
// Yield
// =============================================================================

pub(crate) unsafe fn yield_internal(
    kind: ReturnKind,
    p: *mut Prompt,
    fun: YieldFn,
    arg: *mut c_void,
) -> *mut c_void {
    unsafe {
        debug_assert!(is_active(p), "yield target must be active");
        debug_assert!(is_ancestor(p), "can only yield to an ancestor prompt");
        let mut res = ResumePoint {
            jmp: Jmpbuf::zeroed(),
            result: ptr::null_mut(),
        };
        // YR: capture the chain above `p` and continue the parent.
        let ret = prompt_unlink(p, &mut res);
        (*ret).kind = kind;
        (*ret).fun = Some(fun);
        (*ret).arg = arg;
        ctx::transfer(&mut res.jmp, &(*ret).jmp);
        // Y: resumed; the resumer stored our result before continuing us.
        debug_assert!(is_active(p));
        debug_assert!(is_ancestor(p));
        res.result
    }
}

/// Yield to the ancestor prompt `p` and run `fun(handle, arg)` back on its
/// parent stack, handing it an at-most-once resumption of everything
/// between `p` and the yield point.
///
/// Returns the value the resumption is eventually resumed with.
///
/// # Safety
///
/// `p` must be an active ancestor of the current prompt. `fun` and `arg`
/// are invoked on the parent stack with no lifetime checking; if the
/// resumption is dropped instead of resumed, the frames between `p` and the
/// yield point are discarded without running destructors.
pub unsafe fn yield_once(p: *mut Prompt, fun: YieldFn, arg: *mut c_void) -> *mut c_void {
    unsafe { yield_internal(ReturnKind::YieldOnce, p, fun, arg) }
}

/// As [`yield_once`], but the handler receives a multi-shot resumption that
/// can be duplicated and resumed any number of times.
///
/// # Safety
///
/// As [`yield_once`]. Additionally, every resume after the first replays
/// the captured stack bytes, so values on the captured frames must tolerate
/// being observed from multiple resumed copies.
pub unsafe fn yield_multi(p: *mut Prompt, fun: YieldFn, arg: *mut c_void) -> *mut c_void {
    unsafe { yield_internal(ReturnKind::YieldMulti, p, fun, arg) }
}
