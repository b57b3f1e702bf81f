use core::fmt;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    crate::serial::print(args);
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        $crate::util::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

pub use crate::kprintln;

/// Erros "kernel-level" dos alocadores usados pelo núcleo de threads.
///
/// Nenhum deles é recuperável aqui: o gerenciador de threads transforma
/// qualquer `Err` em pânico.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// Allocator has no room left for the request.
    NoMemory,
    /// Pointer or region does not belong to the allocator.
    Invalid,
    /// Fixed-capacity table is full.
    Busy,
}

impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KError::NoMemory => "out of memory",
            KError::Invalid => "invalid argument",
            KError::Busy => "table full",
        };
        f.write_str(s)
    }
}

pub type KResult<T> = core::result::Result<T, KError>;
