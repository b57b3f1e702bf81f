//! COM1 diagnostic sink.
//!
//! Until `init()` runs, `print()` drops everything. Host test builds never
//! call `init()`, so no port I/O happens outside the kernel.

use core::fmt;
use spin::Mutex;
use x86_64::instructions::port::Port;

// COM1 base
const COM1: u16 = 0x3F8;

/// Line status: transmitter holding register empty.
const LSR_THRE: u8 = 0x20;

pub struct Serial {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl Serial {
    /// # Safety
    /// `base` must be the I/O base of a 16550-compatible UART.
    pub const unsafe fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    /// 115200 8N1, FIFO on, no UART interrupts.
    ///
    /// # Safety
    /// Port I/O; only valid in ring 0.
    unsafe fn init(&mut self) {
        self.int_en.write(0x00);
        self.line_ctrl.write(0x80); // DLAB
        self.data.write(0x01);
        self.int_en.write(0x00);
        self.line_ctrl.write(0x03);
        self.fifo_ctrl.write(0xC7);
        self.modem_ctrl.write(0x0B);
    }

    fn write_byte(&mut self, b: u8) {
        while unsafe { self.line_status.read() } & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
        unsafe { self.data.write(b) };
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
        Ok(())
    }
}

static SERIAL: Mutex<Option<Serial>> = Mutex::new(None);

/// Bring up COM1. Idempotent.
pub fn init() {
    let mut guard = SERIAL.lock();
    if guard.is_some() {
        return;
    }
    let mut s = unsafe { Serial::new(COM1) };
    unsafe { s.init() };
    *guard = Some(s);
}

pub fn is_enabled() -> bool {
    SERIAL.lock().is_some()
}

pub fn print(args: fmt::Arguments) {
    use core::fmt::Write;
    let mut guard = SERIAL.lock();
    if let Some(s) = guard.as_mut() {
        let _ = s.write_fmt(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_is_silent_until_init() {
        assert!(!is_enabled());
        print(format_args!("dropped {}\n", 42));
        assert!(!is_enabled());
    }
}
