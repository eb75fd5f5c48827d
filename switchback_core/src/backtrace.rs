//! Backtraces that cross prompt boundaries.
//!
//! A native unwinder walks frames until its unwind information runs out,
//! which on a switched stack is the stack's entry point; the parent frames
//! live on a different stack it knows nothing about. The adapter here
//! finishes the job with the library's own machinery: capture what the
//! unwinder can see on the current stack, then yield to the enclosing
//! prompt, capture again on its parent stack, and tail-resume back with the
//! extra frame count. No unwinder support is needed beyond "walks one
//! contiguous stack".

use std::ffi::c_void;

use crate::engine::yield_once;
use crate::prompt::prompt_top;
use crate::resumption::Resumption;

/// Captures program counters from the current contiguous stack into the
/// buffer, returning how many were written. Must stop when the buffer is
/// full.
pub type CaptureFn = fn(&mut [*mut c_void]) -> usize;

/// Capture a backtrace across all enclosing prompt boundaries.
///
/// Fills `frames` with program counters, innermost first, and returns the
/// number written.
pub fn backtrace(frames: &mut [*mut c_void]) -> usize {
    backtrace_with(capture_stack_segment, frames)
}

/// As [`backtrace`], with a caller-provided per-stack capture function.
pub fn backtrace_with(capture: CaptureFn, frames: &mut [*mut c_void]) -> usize {
    let n = capture(frames);
    if n >= frames.len() {
        return n;
    }
    let p = prompt_top();
    if p.is_null() {
        return n;
    }
    // More room and more stacks: collect the rest from the parent side.
    let rest = &mut frames[n..];
    let mut env = CaptureEnv {
        capture,
        frames: rest.as_mut_ptr(),
        len: rest.len(),
    };
    let m = unsafe {
        yield_once(
            p,
            capture_parent_frames,
            std::ptr::addr_of_mut!(env).cast::<c_void>(),
        )
    } as usize;
    debug_assert!(n + m <= frames.len());
    n + m
}

struct CaptureEnv {
    capture: CaptureFn,
    frames: *mut *mut c_void,
    len: usize,
}

unsafe fn capture_parent_frames(k: Resumption, envp: *mut c_void) -> *mut c_void {
    let (capture, rest) = unsafe {
        let env = &*(envp as *mut CaptureEnv);
        (env.capture, std::slice::from_raw_parts_mut(env.frames, env.len))
    };
    let m = backtrace_with(capture, rest);
    unsafe { k.resume_tail(m as *mut c_void) }
}

/// Default capture: the `backtrace` crate's frame walk, which ends where
/// the current stack's unwind information does.
fn capture_stack_segment(frames: &mut [*mut c_void]) -> usize {
    let mut n = 0;
    unsafe {
        ::backtrace::trace_unsynchronized(|frame| {
            if n == frames.len() {
                return false;
            }
            frames[n] = frame.ip().cast::<c_void>();
            n += 1;
            true
        });
    }
    n
}
