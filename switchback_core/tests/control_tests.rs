//! End-to-end control transfer: enter, yield, resume, tail-resume, panic
//! propagation and release.

use std::ffi::c_void;
use std::panic::catch_unwind;
use std::ptr;

use switchback_core::{
    flush_delayed, prompt, prompt_parent, prompt_top, thread_active_stacks, yield_once, Prompt,
    Resumption,
};

fn to_arg(n: usize) -> *mut c_void {
    n as *mut c_void
}

// =============================================================================
// Identity yield
// =============================================================================

unsafe fn add_one_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    unsafe { k.resume(to_arg(arg as usize + 1)) }
}

unsafe fn yield_ten_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    unsafe { yield_once(p, add_one_handler, to_arg(10)) }
}

#[test]
fn identity_yield() {
    let r = unsafe { prompt(yield_ten_body, ptr::null_mut()) };
    assert_eq!(r as usize, 11);
}

// =============================================================================
// Plain return, no yield
// =============================================================================

unsafe fn addition_body(_p: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    to_arg(arg as usize + 5)
}

#[test]
fn plain_return() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(addition_body, to_arg(37)) };
    assert_eq!(r as usize, 42);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Panic propagation
// =============================================================================

unsafe fn panicking_body(_p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    panic!("kaboom")
}

#[test]
fn panic_crosses_the_boundary() {
    let before = thread_active_stacks();
    let err = catch_unwind(|| unsafe { prompt(panicking_body, ptr::null_mut()) })
        .expect_err("the prompt body's panic must reach the caller");
    assert_eq!(*err.downcast_ref::<&str>().expect("payload kept"), "kaboom");
    // The prompt's stack was released on the way out.
    assert_eq!(thread_active_stacks(), before);
    flush_delayed();
}

unsafe fn panic_after_yield_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let v = unsafe { yield_once(p, add_one_handler, to_arg(1)) };
    assert_eq!(v as usize, 2);
    panic!("late kaboom")
}

#[test]
fn panic_after_resume_crosses_too() {
    let before = thread_active_stacks();
    let err = catch_unwind(|| unsafe { prompt(panic_after_yield_body, ptr::null_mut()) })
        .expect_err("the panic after the resume must reach the caller");
    assert_eq!(*err.downcast_ref::<&str>().expect("payload kept"), "late kaboom");
    assert_eq!(thread_active_stacks(), before);
    flush_delayed();
}

// =============================================================================
// Deep tail resume
// =============================================================================

unsafe fn countdown_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    let n = arg as usize;
    if n == 0 {
        // Dropping the resumption abandons the counting body.
        to_arg(0)
    } else {
        unsafe { k.resume_tail(to_arg(n - 1)) }
    }
}

unsafe fn countdown_body(p: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let mut n = arg as usize;
    loop {
        n = unsafe { yield_once(p, countdown_handler, to_arg(n)) } as usize;
        if n == 0 {
            return to_arg(usize::MAX);
        }
    }
}

#[test]
fn million_tail_resumes_run_in_constant_space() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(countdown_body, to_arg(1_000_000)) };
    assert_eq!(r as usize, 0);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Drop without resume
// =============================================================================

unsafe fn discarding_handler(k: Resumption, _arg: *mut c_void) -> *mut c_void {
    drop(k);
    to_arg(7)
}

unsafe fn abandoned_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let _ = unsafe { yield_once(p, discarding_handler, ptr::null_mut()) };
    unreachable!("a dropped resumption must never come back")
}

#[test]
fn dropping_the_resumption_releases_the_stack() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(abandoned_body, ptr::null_mut()) };
    assert_eq!(r as usize, 7);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Nested prompts, yield past the inner one
// =============================================================================

unsafe fn nested_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    unsafe { k.resume(to_arg(arg as usize + 1)) }
}

unsafe fn inner_body(p2: *mut Prompt, arg: *mut c_void) -> *mut c_void {
    let p1 = arg as *mut Prompt;
    assert_eq!(unsafe { prompt_parent(p2) }, p1);
    // Yield to the outer prompt; the inner one rides along in the capture.
    let v = unsafe { yield_once(p1, nested_handler, to_arg(5)) } as usize;
    // Back here after the resume re-linked both prompts.
    assert_eq!(prompt_top(), p2);
    to_arg(v * 10)
}

unsafe fn outer_body(p1: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    let inner = unsafe { prompt(inner_body, p1.cast::<c_void>()) };
    to_arg(inner as usize + 7)
}

#[test]
fn yield_targets_an_ancestor_across_a_nested_prompt() {
    let before = thread_active_stacks();
    let r = unsafe { prompt(outer_body, ptr::null_mut()) };
    // Handler saw 5, resumed with 6; inner made 60, outer added 7.
    assert_eq!(r as usize, 67);
    assert_eq!(thread_active_stacks(), before);
}

// =============================================================================
// Chain observation
// =============================================================================

unsafe fn chain_checking_handler(k: Resumption, arg: *mut c_void) -> *mut c_void {
    let p = arg as *mut Prompt;
    // The yielded-from prompt is captured, not on the handler's chain.
    assert_ne!(prompt_top(), p);
    unsafe { k.resume(ptr::null_mut()) }
}

unsafe fn chain_checking_body(p: *mut Prompt, _arg: *mut c_void) -> *mut c_void {
    assert_eq!(prompt_top(), p);
    assert_eq!(unsafe { prompt_parent(ptr::null_mut()) }, p);
    unsafe {
        yield_once(p, chain_checking_handler, p.cast::<c_void>());
    }
    // Active again after the resume.
    assert_eq!(prompt_top(), p);
    to_arg(1)
}

#[test]
fn chain_links_and_unlinks_around_yield() {
    assert!(prompt_top().is_null());
    let r = unsafe { prompt(chain_checking_body, ptr::null_mut()) };
    assert_eq!(r as usize, 1);
    assert!(prompt_top().is_null());
}

// =============================================================================
// Chains are per thread
// =============================================================================

#[test]
fn chains_are_independent_across_threads() {
    let workers: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let r = unsafe { prompt(yield_ten_body, ptr::null_mut()) };
                    assert_eq!(r as usize, 11);
                }
                i
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }
}
