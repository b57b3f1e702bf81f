//! Contexto de execução de uma thread e a fronteira `unsafe` que conhece o
//! layout dos registradores.
//!
//! Um contexto novo é montado para parecer o de uma thread interrompida:
//! a pilha salva contém uma `TrapFrame` sintética e o endereço de retomada é
//! o trampolim `kthread_irq_return`. Assim a primeira ativação e qualquer
//! retomada posterior passam pelo mesmo caminho.
//!
//! Layout da pilha de uma thread nova (endereços decrescentes):
//!
//! ```text
//!   top        ----------------------------  (alinhado a 16)
//!   top - 8    | kthread_thread_return      |  <- rsp na entrada de `entry`
//!   top - 184  | TrapFrame                  |  <- rsp salvo no contexto
//! ```

use core::arch::global_asm;
use core::mem::{offset_of, size_of};

use x86_64::VirtAddr;

use crate::arch::x86_64_arch::current_selectors;
use crate::arch::x86_64_arch::interrupts::{irq_return_addr, TrapFrame, RFLAGS_RESERVED, INITIAL_RFLAGS};

/// Entry point of a thread. The four arguments arrive in `rdi`, `rsi`, `rdx`
/// and `rcx`; only the startup thread gets non-zero values.
pub type ThreadEntry = extern "C" fn(usize, usize, usize, usize);

/// Routine reached when a thread's entry function returns.
pub type ExitRoutine = extern "C" fn() -> !;

/// Up to four start-up arguments.
///
/// Only arrays of length 0 to 4 convert into `StartArgs`, so the cap is checked
/// by the compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartArgs([usize; 4]);

impl StartArgs {
    pub const NONE: StartArgs = StartArgs([0; 4]);

    pub fn as_slice(&self) -> &[usize; 4] {
        &self.0
    }
}

macro_rules! start_args_from_array {
    ($($n:literal),*) => {
        $(
            impl From<[usize; $n]> for StartArgs {
                fn from(args: [usize; $n]) -> Self {
                    let mut slots = [0usize; 4];
                    slots[..$n].copy_from_slice(&args);
                    StartArgs(slots)
                }
            }
        )*
    };
}

start_args_from_array!(0, 1, 2, 3, 4);

/// Registradores salvos de uma thread suspensa.
///
/// O chamador de `kthread_ctx_switch` já salvou os registradores caller-saved
/// (ABI System V), então só os callee-saved, `rsp`, `rflags` e o endereço de
/// retomada precisam ficar aqui.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
    rflags: u64,
    /// Identity slot: the owning thread's handle, read back by `Scheduler::current`.
    tcb: u64,
}

// Offsets usados pelo assembly abaixo.
const _: () = assert!(offset_of!(Context, rsp) == 0x00);
const _: () = assert!(offset_of!(Context, rbp) == 0x08);
const _: () = assert!(offset_of!(Context, rbx) == 0x10);
const _: () = assert!(offset_of!(Context, r12) == 0x18);
const _: () = assert!(offset_of!(Context, r15) == 0x30);
const _: () = assert!(offset_of!(Context, rip) == 0x38);
const _: () = assert!(offset_of!(Context, rflags) == 0x40);

impl Context {
    /// Contexto vazio. Used for a context that is first written by a switch
    /// away from it (the adopted boot thread).
    pub const fn empty() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            tcb: 0,
        }
    }

    fn init(resume: u64, stack_top: VirtAddr) -> Self {
        Self {
            rsp: stack_top.as_u64(),
            rip: resume,
            rflags: RFLAGS_RESERVED,
            ..Self::empty()
        }
    }

    /// Reserva espaço para um `T` no topo da pilha salva.
    ///
    /// # Safety
    /// The saved stack must have room for `T` below the current `rsp`.
    unsafe fn stack_push<T>(&mut self) -> *mut T {
        self.rsp -= size_of::<T>() as u64;
        self.rsp as *mut T
    }

    /// Builds the context of a thread that has never run.
    ///
    /// When loaded, the context resumes in the interrupt-return trampoline,
    /// which pops the synthetic frame and lands on `entry` with `args` in the
    /// argument registers. If `entry` returns, `kthread_thread_return` realigns
    /// the stack and calls `exit`.
    ///
    /// # Safety
    /// `stack_top` must be the 16-byte aligned end of a writable region of at
    /// least one page that belongs to the new thread and nothing else.
    pub unsafe fn for_new_thread(
        stack_top: VirtAddr,
        entry: ThreadEntry,
        exit: ExitRoutine,
        identity: u64,
        args: &StartArgs,
    ) -> Self {
        assert!(stack_top.is_aligned(16u64), "thread stack top not 16-byte aligned");

        let mut ctx = Context::init(irq_return_addr(), stack_top);

        // Endereço de retorno de `entry`.
        let ret = ctx.stack_push::<u64>();
        ret.write(thread_return_addr());

        let (cs, ss) = current_selectors();
        let [a0, a1, a2, a3] = args.0;

        let frame = ctx.stack_push::<TrapFrame>();
        frame.write(TrapFrame {
            rdi: a0 as u64,
            rsi: a1 as u64,
            rdx: a2 as u64,
            rcx: a3 as u64,
            // callee-saved: sobrevive a `entry` e é lido por kthread_thread_return
            rbx: exit as usize as u64,
            rip: entry as usize as u64,
            cs,
            rflags: INITIAL_RFLAGS,
            rsp: ret as u64,
            ss,
            ..TrapFrame::default()
        });

        ctx.tcb = identity;
        ctx
    }

    pub fn identity(&self) -> u64 {
        self.tcb
    }

    pub fn set_identity(&mut self, identity: u64) {
        self.tcb = identity;
    }

    /// Saved stack pointer.
    pub fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.rsp)
    }

    /// Address execution continues at when the context is loaded.
    pub fn resume_address(&self) -> u64 {
        self.rip
    }

    /// The synthetic frame of a context built by `for_new_thread` that has not
    /// run yet.
    ///
    /// # Safety
    /// Only valid before the first activation of the context.
    pub unsafe fn pending_frame(&self) -> &TrapFrame {
        &*(self.rsp as *const TrapFrame)
    }
}

global_asm!(
    r#"
.section .text
.p2align 4
.global kthread_ctx_switch
kthread_ctx_switch:
    // rdi = &mut Context (old), rsi = &Context (new)
    mov [rdi + 0x00], rsp
    mov [rdi + 0x08], rbp
    mov [rdi + 0x10], rbx
    mov [rdi + 0x18], r12
    mov [rdi + 0x20], r13
    mov [rdi + 0x28], r14
    mov [rdi + 0x30], r15
    lea rax, [rip + .Lkthread_resume]
    mov [rdi + 0x38], rax
    pushfq
    pop qword ptr [rdi + 0x40]
    jmp .Lkthread_restore
.Lkthread_resume:
    ret

.p2align 4
.global kthread_ctx_load
kthread_ctx_load:
    // rdi = &Context
    mov rsi, rdi
.Lkthread_restore:
    push qword ptr [rsi + 0x40]
    popfq
    mov rsp, [rsi + 0x00]
    mov rbp, [rsi + 0x08]
    mov rbx, [rsi + 0x10]
    mov r12, [rsi + 0x18]
    mov r13, [rsi + 0x20]
    mov r14, [rsi + 0x28]
    mov r15, [rsi + 0x30]
    jmp qword ptr [rsi + 0x38]

.p2align 4
.global kthread_thread_return
kthread_thread_return:
    // rbx = ExitRoutine, deixado pela TrapFrame sintética
    and rsp, -16
    call rbx
    ud2
"#
);

extern "C" {
    fn kthread_ctx_switch(old: *mut Context, new: *const Context);
    fn kthread_ctx_load(ctx: *const Context) -> !;
    fn kthread_thread_return();
}

fn thread_return_addr() -> u64 {
    kthread_thread_return as usize as u64
}

/// Salva os registradores em `old` e retoma `new`.
///
/// Returns when some other thread switches back to `old`.
///
/// # Safety
/// Both contexts must stay alive and unmoved until `old` is resumed. `new`
/// must come from `for_new_thread` or from an earlier switch away from it.
#[inline]
pub unsafe fn context_switch(old: *mut Context, new: *const Context) {
    kthread_ctx_switch(old, new);
}

/// Carrega `ctx` sem salvar nada: o contexto atual é abandonado.
///
/// # Safety
/// Same requirements on `ctx` as `context_switch`.
#[inline]
pub unsafe fn context_load(ctx: *const Context) -> ! {
    kthread_ctx_load(ctx)
}
