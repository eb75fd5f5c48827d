//! Raw virtual-memory operations.

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{
    c_void, madvise, mmap, mprotect, munmap, sysconf, MADV_DONTNEED, MAP_ANONYMOUS, MAP_FAILED,
    MAP_NORESERVE, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, _SC_PAGESIZE,
};

/// OS page size, cached after the first query.
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = unsafe { sysconf(_SC_PAGESIZE) } as usize;
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

pub(crate) fn page_align_up(size: usize) -> usize {
    let page = page_size();
    (size + page - 1) & !(page - 1)
}

/// Reserve `size` bytes of address space with no access rights.
pub(crate) fn reserve(size: usize) -> Option<NonNull<u8>> {
    let ptr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            PROT_NONE,
            MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
            -1,
            0,
        )
    };
    if ptr == MAP_FAILED {
        return None;
    }
    NonNull::new(ptr as *mut u8)
}

/// Make `[ptr, ptr + size)` readable and writable. Physical pages are still
/// committed on first touch.
pub(crate) fn commit(ptr: *mut u8, size: usize) -> bool {
    unsafe { mprotect(ptr as *mut c_void, size, PROT_READ | PROT_WRITE) == 0 }
}

/// Return the physical pages behind `[ptr, ptr + size)` to the OS while
/// keeping the mapping and its protection. The range reads as zeros on the
/// next touch.
pub(crate) fn decommit(ptr: *mut u8, size: usize) {
    unsafe {
        madvise(ptr as *mut c_void, size, MADV_DONTNEED);
    }
}

/// Unmap a reservation.
pub(crate) fn release(ptr: *mut u8, size: usize) {
    let rc = unsafe { munmap(ptr as *mut c_void, size) };
    debug_assert_eq!(rc, 0, "munmap failed: {}", io::Error::last_os_error());
}
