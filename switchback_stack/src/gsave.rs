//! Stack snapshots for multi-shot resumption.

use crate::stats;

/// A copy of the live bytes of a suspended stack.
///
/// Captured from the suspended stack pointer up to the end of the stack
/// region (header area included), and copied back over the same range
/// before the stack is resumed again. Dropping the snapshot frees the
/// copy.
#[derive(Debug)]
pub struct Gsave {
    /// Where the bytes came from and go back to (the suspended sp).
    dst: *mut u8,
    bytes: Box<[u8]>,
}

impl Gsave {
    /// Copy `[sp, base)` out of the stack.
    ///
    /// # Safety
    ///
    /// The range must be mapped, readable and quiescent (the stack is
    /// suspended and nothing else writes it during the copy).
    pub(crate) unsafe fn capture(sp: *mut u8, base: *mut u8) -> Gsave {
        debug_assert!(sp as usize <= base as usize);
        let len = base as usize - sp as usize;
        let bytes = unsafe { std::slice::from_raw_parts(sp, len) }
            .to_vec()
            .into_boxed_slice();
        stats::record_snapshot();
        Gsave { dst: sp, bytes }
    }

    /// Copy the snapshot back over the stack it came from.
    ///
    /// # Safety
    ///
    /// The originating stack must still be mapped with the same geometry
    /// and must be suspended: restoring a stack that is being executed on
    /// tears the machine state out from under it.
    pub unsafe fn restore(&self) {
        unsafe {
            std::ptr::copy_nonoverlapping(self.bytes.as_ptr(), self.dst, self.bytes.len());
        }
        stats::record_restore();
    }

    /// Number of bytes captured.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the snapshot is empty (the stack had no live bytes).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gstack::Gstack;

    #[test]
    fn capture_and_restore_round_trip() {
        let mut gs = Gstack::alloc().expect("stack allocation failed");
        let _ = gs.reserve(64, 16);

        // Scribble a recognizable pattern where stack frames would live.
        let sp = unsafe { gs.base().sub(256) };
        unsafe {
            for i in 0..256u32 {
                *sp.add(i as usize) = i as u8;
            }
        }

        let save = unsafe { gs.save(sp) };
        // The snapshot spans the scribbled range plus the reserved header.
        assert_eq!(save.len(), 256 + 64);
        assert!(!save.is_empty());

        // Clobber the live range, then restore it.
        unsafe {
            std::ptr::write_bytes(sp, 0xff, 256);
            save.restore();
            for i in 0..256u32 {
                assert_eq!(*sp.add(i as usize), i as u8);
            }
        }

        gs.free(false);
    }
}
