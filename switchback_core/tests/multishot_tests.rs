//! Multi-shot resumptions: duplication, replay of captured stack state,
//! counting, and release.

use std::ffi::c_void;
use std::hint::black_box;
use std::ptr;

use switchback_core::{
    prompt, thread_active_stacks, yield_multi, Prompt, ResumeError, Resumption,
};

fn to_arg(n: usize) -> *mut c_void {
    n as *mut c_void
}

// =============================================================================
// Double resume
// =============================================================================

unsafe fn double_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    let k2 = k.dup().expect("multi handles dup");
    let a = unsafe { k2.resume(to_arg(1)) } as usize;
    let b = unsafe { k.resume(to_arg(2)) } as usize;
    to_arg(a + b)
}

unsafe fn double_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let v = unsafe { yield_multi(p, double_handler, ptr::null_mut()) } as usize;
    to_arg(100 + v)
}

#[test]
fn body_runs_once_per_resume() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(double_body, ptr::null_mut()) };
    assert_eq!(r as usize, 101 + 102);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Each resume observes the state at capture
// =============================================================================

unsafe fn triple_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    let k2 = k.dup().expect("multi handles dup");
    let k3 = k.dup().expect("multi handles dup");
    let a = unsafe { k.resume(to_arg(1)) } as usize;
    let b = unsafe { k2.resume(to_arg(2)) } as usize;
    let c = unsafe { k3.resume(to_arg(3)) } as usize;
    to_arg(a + b + c)
}

unsafe fn stateful_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let mut cells = [0usize; 8];
    cells[3] = 40;
    black_box(&mut cells);
    let v = unsafe { yield_multi(p, triple_handler, ptr::null_mut()) } as usize;
    // Every replay must see the pre-yield 40, not a later increment.
    cells[3] += v;
    black_box(&mut cells);
    to_arg(cells[3])
}

#[test]
fn replays_restore_the_captured_frame() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(stateful_body, ptr::null_mut()) };
    assert_eq!(r as usize, 41 + 42 + 43);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Nested capture resumed twice
// =============================================================================

unsafe fn nested_ms_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    let k2 = k.dup().expect("multi handles dup");
    let a = unsafe { k2.resume(to_arg(1)) } as usize;
    let b = unsafe { k.resume(to_arg(3)) } as usize;
    to_arg(a + b)
}

unsafe fn nested_ms_inner(_p2: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let p1 = arg as *mut Prompt;
    let v = unsafe { yield_multi(p1, nested_ms_handler, ptr::null_mut()) } as usize;
    to_arg(v + 10)
}

unsafe fn nested_ms_outer(p1: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let inner = unsafe { prompt(nested_ms_inner, p1.cast::<c_void>()) } as usize;
    to_arg(inner * 2)
}

#[test]
fn nested_chain_replays_both_stacks() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(nested_ms_outer, ptr::null_mut()) };
    // First resume: (1 + 10) * 2; second: (3 + 10) * 2.
    assert_eq!(r as usize, 22 + 26);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Handle inspection
// =============================================================================

unsafe fn inspecting_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    assert_eq!(k.resume_count(), 0);
    assert!(k.should_unwind());

    let k2 = k.dup().expect("multi handles dup");
    assert!(!k.should_unwind(), "shared handle may be observed again");

    let a = unsafe { k2.resume(to_arg(1)) } as usize;
    assert_eq!(k.resume_count(), 1);
    assert!(!k.should_unwind(), "already resumed");

    let b = unsafe { k.resume(to_arg(2)) } as usize;
    to_arg(a + b)
}

unsafe fn inspected_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    unsafe { yield_multi(p, inspecting_handler, ptr::null_mut()) }
}

#[test]
fn resume_count_and_should_unwind_track_the_record() {
    let r = unsafe { prompt(inspected_body, ptr::null_mut()) };
    assert_eq!(r as usize, 1 + 2);
}

unsafe fn once_inspecting_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    assert_eq!(k.dup().unwrap_err(), ResumeError::DupOnce);
    assert_eq!(k.resume_count(), 0);
    assert!(!k.should_unwind());
    unsafe { k.resume(to_arg(9)) }
}

unsafe fn once_inspected_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    unsafe { switchback_core::yield_once(p, once_inspecting_handler, ptr::null_mut()) }
}

#[test]
fn once_handles_reject_dup() {
    let r = unsafe { prompt(once_inspected_body, ptr::null_mut()) };
    assert_eq!(r as usize, 9);
}

// =============================================================================
// Dropping every handle releases everything exactly once
// =============================================================================

unsafe fn dropping_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    let k2 = k.dup().expect("multi handles dup");
    drop(k2);
    drop(k);
    to_arg(5)
}

unsafe fn never_resumed_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let _ = unsafe { yield_multi(p, dropping_handler, ptr::null_mut()) };
    unreachable!("a dropped resumption must never come back")
}

#[test]
fn dropping_all_handles_releases_the_capture() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(never_resumed_body, ptr::null_mut()) };
    assert_eq!(r as usize, 5);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Multi handles keep the tail property on their first resume
// =============================================================================

unsafe fn multi_tail_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    let n = arg as usize;
    if n == 0 {
        to_arg(0)
    } else {
        unsafe { k.resume_tail(to_arg(n - 1)) }
    }
}

unsafe fn multi_tail_body(p: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let mut n = arg as usize;
    loop {
        n = unsafe { yield_multi(p, multi_tail_handler, to_arg(n)) } as usize;
        if n == 0 {
            return to_arg(usize::MAX);
        }
    }
}

#[test]
fn multi_tail_resumes_stay_bounded() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(multi_tail_body, to_arg(100_000)) };
    assert_eq!(r as usize, 0);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Resume after the handler frame returned
// =============================================================================

unsafe fn stashing_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    let slot = arg as *mut Option<Resumption>;
    unsafe { *slot = Some(k) };
    to_arg(0)
}

unsafe fn stashed_body(p: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let v = unsafe { yield_multi(p, stashing_handler, arg) } as usize;
    to_arg(v + 100)
}

#[test]
fn stashed_resumption_outlives_the_prompt_call() {
    let before = thread_active_stacks();
    let mut slot: Option<Resumption> = None;
    let first = unsafe {
        prompt(
            stashed_body,
            ptr::addr_of_mut!(slot).cast::<c_void>(),
        )
    };
    // The handler returned without resuming, so the prompt call yielded 0.
    assert_eq!(first as usize, 0);
    let k = slot.take().expect("handler stashed the resumption");
    // The capture is still alive and resumable from plain test code.
    let second = unsafe { k.resume(to_arg(11)) } as usize;
    assert_eq!(second, 111);
    assert_eq!(thread_active_stacks(), before);
}
