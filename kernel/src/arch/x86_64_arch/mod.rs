pub mod interrupts;

use x86_64::registers::segmentation::{Segment, CS, SS};

pub fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Seletores (CS, SS) do contexto corrente.
///
/// Threads criadas herdam os seletores de quem as criou, então o `iretq`
/// do trampolim volta sempre ao mesmo nível de privilégio.
#[inline]
pub fn current_selectors() -> (u64, u64) {
    (CS::get_reg().0 as u64, SS::get_reg().0 as u64)
}
