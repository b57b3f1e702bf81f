pub mod x86_64_arch;

pub use x86_64_arch::halt_loop;
