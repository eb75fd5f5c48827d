//! AArch64 (AAPCS64) context layout and switching assembly.

use core::arch::global_asm;

/// Saved machine context for aarch64.
///
/// Layout is fixed by the assembly below; field order must not change.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Jmpbuf {
    reg_ip: u64,       // 0x00: continuation address (saved lr)
    reg_sp: u64,       // 0x08
    reg_fp: u64,       // 0x10: x29
    regs: [u64; 10],   // 0x18: x19..x28
    fregs: [u64; 8],   // 0x68: d8..d15
    fpcr: u64,         // 0xa8
}

impl Jmpbuf {
    /// An empty context. Must be filled by `sb_ctx_transfer`/`sb_ctx_enter`
    /// before it can be jumped to.
    pub const fn zeroed() -> Self {
        Self {
            reg_ip: 0,
            reg_sp: 0,
            reg_fp: 0,
            regs: [0; 10],
            fregs: [0; 8],
            fpcr: 0,
        }
    }

    /// The stack pointer recorded in this context.
    #[inline]
    pub fn stack_pointer(&self) -> *mut u8 {
        self.reg_sp as *mut u8
    }
}

global_asm!(
    r#"
    .section .text.sb_ctx, "ax"
    .p2align 4

    .globl sb_ctx_transfer
    .type sb_ctx_transfer, %function
sb_ctx_transfer:
    mov x9, sp
    str x30, [x0, 0x00]
    str x9,  [x0, 0x08]
    str x29, [x0, 0x10]
    stp x19, x20, [x0, 0x18]
    stp x21, x22, [x0, 0x28]
    stp x23, x24, [x0, 0x38]
    stp x25, x26, [x0, 0x48]
    stp x27, x28, [x0, 0x58]
    stp d8,  d9,  [x0, 0x68]
    stp d10, d11, [x0, 0x78]
    stp d12, d13, [x0, 0x88]
    stp d14, d15, [x0, 0x98]
    mrs x10, fpcr
    str x10, [x0, 0xa8]
    mov x0, x1
    b sb_ctx_jump
    .size sb_ctx_transfer, . - sb_ctx_transfer

    .globl sb_ctx_jump
    .type sb_ctx_jump, %function
sb_ctx_jump:
    ldr x30, [x0, 0x00]
    ldr x9,  [x0, 0x08]
    ldr x29, [x0, 0x10]
    ldp x19, x20, [x0, 0x18]
    ldp x21, x22, [x0, 0x28]
    ldp x23, x24, [x0, 0x38]
    ldp x25, x26, [x0, 0x48]
    ldp x27, x28, [x0, 0x58]
    ldp d8,  d9,  [x0, 0x68]
    ldp d10, d11, [x0, 0x78]
    ldp d12, d13, [x0, 0x88]
    ldp d14, d15, [x0, 0x98]
    ldr x10, [x0, 0xa8]
    msr fpcr, x10
    mov sp, x9
    ret
    .size sb_ctx_jump, . - sb_ctx_jump

    .globl sb_ctx_enter
    .type sb_ctx_enter, %function
sb_ctx_enter:
    mov x9, sp
    str x30, [x0, 0x00]
    str x9,  [x0, 0x08]
    str x29, [x0, 0x10]
    stp x19, x20, [x0, 0x18]
    stp x21, x22, [x0, 0x28]
    stp x23, x24, [x0, 0x38]
    stp x25, x26, [x0, 0x48]
    stp x27, x28, [x0, 0x58]
    stp d8,  d9,  [x0, 0x68]
    stp d10, d11, [x0, 0x78]
    stp d12, d13, [x0, 0x88]
    stp d14, d15, [x0, 0x98]
    mrs x10, fpcr
    str x10, [x0, 0xa8]
    and x1, x1, 0xfffffffffffffff0
    mov sp, x1
    mov x29, xzr
    mov x30, xzr
    mov x0, x2
    mov x1, xzr
    blr x3
    brk #0x1
    .size sb_ctx_enter, . - sb_ctx_enter
"#
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jmpbuf_layout() {
        use core::mem::{align_of, offset_of, size_of};
        assert_eq!(offset_of!(Jmpbuf, reg_ip), 0x00);
        assert_eq!(offset_of!(Jmpbuf, reg_sp), 0x08);
        assert_eq!(offset_of!(Jmpbuf, regs), 0x18);
        assert_eq!(offset_of!(Jmpbuf, fregs), 0x68);
        assert_eq!(offset_of!(Jmpbuf, fpcr), 0xa8);
        assert_eq!(size_of::<Jmpbuf>(), 0xb0);
        assert!(align_of::<Jmpbuf>() >= 8);
    }
}
