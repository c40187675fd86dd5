//! Global console over the PL011.
//!
//! Shared between ordinary kernel code, the logger and the panic path, so
//! the lock is an [`IrqSpinMutex`]: any caller holds IRQs off for the
//! duration of its output and interleaving cannot occur.

use core::fmt::{self, Write};

use craybond_arch::IrqSpinMutex;
use craybond_mmio::MmioRegion;

use crate::board;
use crate::uart::Pl011;

struct Console {
    uart: Option<Pl011>,
}

impl Console {
    const fn new() -> Self {
        Self { uart: None }
    }

    fn puts(&self, s: &str) {
        if let Some(uart) = self.uart {
            uart.puts(s);
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s);
        Ok(())
    }
}

static CONSOLE: IrqSpinMutex<Console> = IrqSpinMutex::new(Console::new());

/// Initialise the console on the board UART and enable the hardware.
pub fn init() {
    // SAFETY: The board UART window is a fixed MMIO region on this platform.
    let regs = unsafe { MmioRegion::new(board::UART0_BASE, board::UART0_SIZE) };
    let uart = Pl011::new(regs);
    uart.init();
    CONSOLE.lock().uart = Some(uart);
}

/// Write a string to the console.
pub fn puts(s: &str) {
    CONSOLE.lock().puts(s);
}

/// Write formatted arguments to the console under a single lock hold.
pub fn write_fmt(args: fmt::Arguments<'_>) {
    let mut console = CONSOLE.lock();
    let _ = console.write_fmt(args);
}

/// Write a string straight to the UART, bypassing the console lock.
///
/// For the panic path only: a panic raised while the console lock is held
/// must still reach the wire. IRQs are already off by the time the panic
/// handler runs.
pub fn puts_raw(s: &str) {
    // SAFETY: The board UART window is a fixed MMIO region on this platform.
    let regs = unsafe { MmioRegion::new(board::UART0_BASE, board::UART0_SIZE) };
    Pl011::new(regs).puts(s);
}

/// Unlocked writer over [`puts_raw`], for formatting panic diagnostics.
pub struct RawConsoleWriter;

impl Write for RawConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts_raw(s);
        Ok(())
    }
}

/// Print to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::write_fmt(format_args!($($arg)*))
    };
}

/// Print a line to the console.
#[macro_export]
macro_rules! println {
    () => {
        $crate::console::puts("\n")
    };
    ($($arg:tt)*) => {{
        $crate::console::write_fmt(format_args!($($arg)*));
        $crate::console::puts("\n");
    }};
}
