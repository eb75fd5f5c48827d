//! Multi-shot resumptions: save and restore of suspended stack contents.
//!
//! A multi handle starts out as cheap as a once handle: no stack bytes are
//! copied at yield time. The copy happens lazily, on the first resume that
//! can observe the chain again afterwards (another handle or another prompt
//! reference still exists). From then on every further resume replays the
//! snapshot into the chain's stacks before continuing it, so each resume
//! observes the chain exactly as it was captured.

use std::ffi::c_void;
use std::ptr;

use smallvec::SmallVec;
use switchback_stack::Gsave;

use crate::engine::{prompt_resume, prompt_resume_tail, ReturnPoint};
use crate::prompt::{is_active, prompt_drop, prompt_dup, Prompt};

/// One suspended prompt's stack snapshot, with a reference held on the
/// prompt it belongs to.
struct PromptSave {
    prompt: *mut Prompt,
    gsave: Gsave,
}

/// Captured chains are almost always one or two prompts deep.
type SaveList = SmallVec<[PromptSave; 2]>;

/// Heap record behind a multi handle.
pub(crate) struct MultiResumption {
    refcount: isize,
    resume_count: u64,
    prompt: *mut Prompt,
    /// Snapshots of the captured chain's stacks, top-first. None until a
    /// resume needed one.
    save: Option<SaveList>,
    /// The return point of the first resume, kept so the first tail resume
    /// can reuse it even after regular resumes overwrote the prompt's.
    tail_return_point: *mut ReturnPoint,
}

impl MultiResumption {
    /// Wrap a freshly yielded prompt. Called on the parent stack during
    /// yield dispatch, before any handler runs.
    pub(crate) unsafe fn allocate(p: *mut Prompt) -> *mut MultiResumption {
        let tail_return_point = unsafe { (*p).return_point };
        Box::into_raw(Box::new(MultiResumption {
            refcount: 1,
            resume_count: 0,
            prompt: p,
            save: None,
            tail_return_point,
        }))
    }
}

pub(crate) unsafe fn mresume_dup(r: *mut MultiResumption) {
    unsafe {
        (*r).refcount += 1;
    }
}

pub(crate) unsafe fn mresume_drop(r: *mut MultiResumption) {
    unsafe {
        let old = (*r).refcount;
        debug_assert!(old > 0, "multi resumption refcount underflow");
        (*r).refcount = old - 1;
        if old <= 1 {
            let mut record = Box::from_raw(r);
            if let Some(saves) = record.save.take() {
                for save in saves {
                    drop(save.gsave);
                    prompt_drop(save.prompt);
                }
            }
            prompt_drop(record.prompt);
        }
    }
}

pub(crate) unsafe fn resume_count(r: *mut MultiResumption) -> u64 {
    unsafe { (*r).resume_count }
}

pub(crate) unsafe fn refcount(r: *mut MultiResumption) -> isize {
    unsafe { (*r).refcount }
}

/// Snapshot every stack of the captured chain headed by `head`.
///
/// The live extent of the top prompt's stack starts at the stack pointer
/// recorded at the yield; for each prompt below, it starts at the stack
/// pointer its child's resume recorded in the child's return point.
unsafe fn prompt_save(head: *mut Prompt) -> SaveList {
    unsafe {
        debug_assert!(!is_active(head));
        debug_assert!(!(*head).resume_point.is_null());
        let mut saves = SaveList::new();
        let mut sp = (*(*head).resume_point).jmp.stack_pointer();
        let mut q = (*head).top;
        while !q.is_null() {
            // Take the snapshot's reference before capturing, so the bytes
            // record a refcount that already includes it. Restoring the
            // captured count is then exact: it equals the references the
            // replayed execution and the surviving snapshot entries hold.
            let prompt = prompt_dup(q);
            let gsave = (&(*q).gstack).save(sp);
            saves.push(PromptSave { prompt, gsave });
            sp = if (*q).parent.is_null() {
                ptr::null_mut()
            } else {
                (*(*q).return_point).jmp.stack_pointer()
            };
            q = (*q).parent;
        }
        debug_assert!(!saves.is_empty());
        saves
    }
}

/// Copy every snapshot back into its stack.
unsafe fn prompt_restore(head: *mut Prompt, saves: &SaveList) {
    unsafe {
        debug_assert!(!is_active(head));
        debug_assert!(saves.iter().any(|s| s.prompt == head));
        for save in saves {
            save.gsave.restore();
        }
    }
}

/// Hand out the chain for one resume, in a pristine state.
///
/// If snapshots exist the chain has been resumed before and is replayed
/// from them. Otherwise, if any other handle or prompt reference could
/// still observe the chain, snapshots are taken now. A uniquely owned,
/// never-observed chain is simply consumed. The multi-handle reference is
/// dropped and an execution reference on the prompt is returned in its
/// place.
unsafe fn take_prompt(r: *mut MultiResumption) -> *mut Prompt {
    unsafe {
        let p = (*r).prompt;
        if let Some(saves) = (*r).save.as_ref() {
            prompt_restore(p, saves);
        } else if (*r).refcount > 1 || (*p).refcount > 1 {
            (*r).save = Some(prompt_save(p));
        }
        prompt_dup(p);
        mresume_drop(r);
        p
    }
}

pub(crate) unsafe fn mresume(r: *mut MultiResumption, arg: *mut c_void) -> *mut c_void {
    unsafe {
        (*r).resume_count += 1;
        let p = take_prompt(r);
        prompt_resume(p, arg)
    }
}

/// Tail resume through the preserved first return point, falling back to a
/// regular resume once it has been spent.
pub(crate) unsafe fn mresume_tail(r: *mut MultiResumption, arg: *mut c_void) -> *mut c_void {
    unsafe {
        let ret = (*r).tail_return_point;
        if ret.is_null() {
            return mresume(r, arg);
        }
        (*r).tail_return_point = ptr::null_mut();
        (*r).resume_count += 1;
        let p = take_prompt(r);
        prompt_resume_tail(p, arg, ret)
    }
}
