//! Thread lifecycle and context switch core for the x86_64 kernel.
//!
//! The crate is `no_std` and is linked into the kernel image. Under
//! `cfg(test)` it builds against `std` so the context switch can be exercised
//! on an x86_64 host: threads get real stacks carved out of a test memory
//! region and every switch is a genuine register transfer.

#![cfg_attr(not(test), no_std)]

#[cfg(not(target_arch = "x86_64"))]
compile_error!("kthread only supports x86_64");

pub mod arch;
pub mod mm;
pub mod serial;
pub mod task;
pub mod util;

pub use task::{
    kernel_exit, CritSection, ExitRoutine, SchedStats, Scheduler, StartArgs, ThreadEntry,
    ThreadId, ThreadState,
};
