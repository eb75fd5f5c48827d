//! x86_64 System V context layout and switching assembly.

use core::arch::global_asm;

/// Saved machine context for x86_64.
///
/// Layout is fixed by the assembly below; field order must not change.
/// `reg_sp` is the stack pointer the continuation resumes with, which is
/// also where the live extent of a suspended stack begins.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Jmpbuf {
    reg_ip: usize,  // 0x00: continuation address
    reg_sp: usize,  // 0x08: stack pointer after the continuation resumes
    reg_bp: usize,  // 0x10
    reg_bx: usize,  // 0x18
    reg_r12: usize, // 0x20
    reg_r13: usize, // 0x28
    reg_r14: usize, // 0x30
    reg_r15: usize, // 0x38
    mxcsr: u32,     // 0x40: SSE control/status
    fpucw: u16,     // 0x44: x87 control word
    _pad: u16,
}

impl Jmpbuf {
    /// An empty context. Must be filled by `sb_ctx_transfer`/`sb_ctx_enter`
    /// before it can be jumped to.
    pub const fn zeroed() -> Self {
        Self {
            reg_ip: 0,
            reg_sp: 0,
            reg_bp: 0,
            reg_bx: 0,
            reg_r12: 0,
            reg_r13: 0,
            reg_r14: 0,
            reg_r15: 0,
            mxcsr: 0,
            fpucw: 0,
            _pad: 0,
        }
    }

    /// The stack pointer recorded in this context.
    #[inline]
    pub fn stack_pointer(&self) -> *mut u8 {
        self.reg_sp as *mut u8
    }
}

// The save sequence in `sb_ctx_transfer` and `sb_ctx_enter` records the
// caller's return address as the continuation ip and the post-return rsp as
// the continuation sp, so continuing a saved context behaves like the
// original call returning (again).
//
// `sb_ctx_enter` aligns the new stack to 16 bytes and then issues a call,
// giving the entry function a standard ABI frame (rsp % 16 == 8 at entry).
// The entry function must never return; `ud2` traps if it does.
global_asm!(
    r#"
    .section .text.sb_ctx, "ax"
    .p2align 4

    .globl sb_ctx_transfer
    .type sb_ctx_transfer, @function
sb_ctx_transfer:
    mov rax, [rsp]
    lea rcx, [rsp + 8]
    mov [rdi + 0x00], rax
    mov [rdi + 0x08], rcx
    mov [rdi + 0x10], rbp
    mov [rdi + 0x18], rbx
    mov [rdi + 0x20], r12
    mov [rdi + 0x28], r13
    mov [rdi + 0x30], r14
    mov [rdi + 0x38], r15
    stmxcsr [rdi + 0x40]
    fnstcw  [rdi + 0x44]
    mov rdi, rsi
    jmp sb_ctx_jump
    .size sb_ctx_transfer, . - sb_ctx_transfer

    .globl sb_ctx_jump
    .type sb_ctx_jump, @function
sb_ctx_jump:
    mov rax, [rdi + 0x00]
    mov rcx, [rdi + 0x08]
    mov rbp, [rdi + 0x10]
    mov rbx, [rdi + 0x18]
    mov r12, [rdi + 0x20]
    mov r13, [rdi + 0x28]
    mov r14, [rdi + 0x30]
    mov r15, [rdi + 0x38]
    ldmxcsr [rdi + 0x40]
    fldcw   [rdi + 0x44]
    mov rsp, rcx
    jmp rax
    .size sb_ctx_jump, . - sb_ctx_jump

    .globl sb_ctx_enter
    .type sb_ctx_enter, @function
sb_ctx_enter:
    mov rax, [rsp]
    lea r8,  [rsp + 8]
    mov [rdi + 0x00], rax
    mov [rdi + 0x08], r8
    mov [rdi + 0x10], rbp
    mov [rdi + 0x18], rbx
    mov [rdi + 0x20], r12
    mov [rdi + 0x28], r13
    mov [rdi + 0x30], r14
    mov [rdi + 0x38], r15
    stmxcsr [rdi + 0x40]
    fnstcw  [rdi + 0x44]
    and rsi, -16
    mov rsp, rsi
    xor ebp, ebp
    mov rdi, rdx
    xor esi, esi
    call rcx
    ud2
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
        assert_eq!(offset_of!(Jmpbuf, reg_r15), 0x38);
        assert_eq!(offset_of!(Jmpbuf, mxcsr), 0x40);
        assert_eq!(offset_of!(Jmpbuf, fpucw), 0x44);
        assert_eq!(size_of::<Jmpbuf>(), 0x48);
        assert!(align_of::<Jmpbuf>() >= 8);
    }
}
