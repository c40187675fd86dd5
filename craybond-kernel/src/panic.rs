//! The panic path.
//!
//! Every fatal condition funnels through here: processor exceptions at
//! EL1, allocator exhaustion, Rust panics. The graphical output path is
//! disabled first (its state cannot be trusted mid-crash), the diagnostic
//! goes synchronously to the UART through the unlocked writer, and the
//! CPU halts.

use core::fmt::Write;

use craybond_arch::cpu;
use craybond_arch::registers::{read_elr_el1, read_esr_el1, read_far_el1};
use craybond_pal::console::{RawConsoleWriter, puts_raw};

use crate::gpu;

/// The crash marker. Test rigs grep for this line.
const MARKER: &str = "*** CRAYON DOESN'T DRAW ANYMORE ***";

/// Halt with a plain message.
pub fn panic(msg: &str) -> ! {
    cpu::irq_disable();
    gpu::disable_visual();
    puts_raw(MARKER);
    puts_raw("\n");
    puts_raw(msg);
    puts_raw("\nSystem Halted\n");
    cpu::halt()
}

/// Halt with a message and one diagnostic value (an offending pointer,
/// an unknown syscall number).
pub fn panic_with_info(msg: &str, info: u64) -> ! {
    cpu::irq_disable();
    gpu::disable_visual();
    puts_raw(MARKER);
    puts_raw("\n");
    puts_raw(msg);
    let _ = write!(RawConsoleWriter, "\nAdditional info: {info:#x}");
    puts_raw("\nSystem Halted\n");
    cpu::halt()
}

/// Halt on a fatal processor exception, dumping the syndrome registers.
pub fn fatal_exception(label: &str) -> ! {
    cpu::irq_disable();
    gpu::disable_visual();

    let esr = read_esr_el1();
    let elr = read_elr_el1();
    let far = read_far_el1();

    puts_raw(MARKER);
    let _ = write!(
        RawConsoleWriter,
        "\n{label}\nESR_EL1: {esr:#x}\nELR_EL1: {elr:#x}\nFAR_EL1: {far:#x}"
    );
    puts_raw("\nSystem Halted\n");
    cpu::halt()
}

/// Rust panic hook, installed by the binary crate.
pub fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    cpu::irq_disable();
    gpu::disable_visual();
    puts_raw(MARKER);
    let _ = write!(RawConsoleWriter, "\n{info}");
    puts_raw("\nSystem Halted\n");
    cpu::halt()
}
