//! Caminho de retorno de interrupção.
//!
//! `kthread_irq_return` espera `rsp` apontando para uma `TrapFrame` e:
//! - restaura os registradores gerais na ordem do layout
//! - descarta `vector`/`error`
//! - faz `iretq` com o frame de CPU (rip, cs, rflags, rsp, ss)
//!
//! Threads novas começam por aqui com uma `TrapFrame` sintética, exatamente
//! como uma thread interrompida que está sendo retomada.

use core::arch::global_asm;
use core::mem::{offset_of, size_of};

use x86_64::registers::rflags::RFlags;

/// `RFLAGS` bit 1 is reserved and always reads as one.
pub const RFLAGS_RESERVED: u64 = 1 << 1;

/// `RFLAGS` a thread starts with: interrupts enabled.
pub const INITIAL_RFLAGS: u64 = RFlags::INTERRUPT_FLAG.bits() | RFLAGS_RESERVED;

/// Layout de TrapFrame exatamente como o stub em assembly empilha.
///
/// Ordem (do menor endereço para o maior) quando `&TrapFrame` aponta para o topo:
/// rax, rbx, rcx, rdx, rsi, rdi, rbp, r8..r15, vector, error, CPU frame (rip,cs,rflags,rsp,ss)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub vector: u64,
    pub error: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const _: () = assert!(size_of::<TrapFrame>() == 22 * 8);
const _: () = assert!(offset_of!(TrapFrame, vector) == 15 * 8);
const _: () = assert!(offset_of!(TrapFrame, rip) == 17 * 8);

global_asm!(
    r#"
.section .text
.p2align 4
.global kthread_irq_return
kthread_irq_return:
    pop rax
    pop rbx
    pop rcx
    pop rdx
    pop rsi
    pop rdi
    pop rbp
    pop r8
    pop r9
    pop r10
    pop r11
    pop r12
    pop r13
    pop r14
    pop r15
    add rsp, 16
    iretq
"#
);

extern "C" {
    fn kthread_irq_return();
}

/// Endereço do trampolim; usado como endereço de retomada de contextos novos.
#[inline]
pub fn irq_return_addr() -> u64 {
    kthread_irq_return as usize as u64
}
