//! # craybond-kernel
//!
//! A single-core kernel for the AArch64 "virt" board. Boot brings the CPU
//! from reset to a state where preemptively scheduled tasks run, one of
//! which drives the boot display through a VirtIO GPU (or the ramfb
//! fallback).
//!
//! # Bring-up order
//!
//! `kmain` runs the subsystems in a fixed order: console, RAM discovery
//! and arenas, GPU probe (before translation is enabled, while PCI config
//! space is flat-addressable), exception vectors, interrupt controller,
//! MMU, then the scheduler with the boot-screen task.
//!
//! # Locking
//!
//! Data shared with interrupt handlers sits behind
//! [`craybond_arch::IrqSpinMutex`]; the console, the process table and the
//! GIC handler table each have one, and no path takes two at once.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod fmt;
pub mod gfx;
pub mod gpu;
pub mod irq;
pub mod kprocs;
pub mod logging;
pub mod memory;
pub mod panic;
pub mod pci;
pub mod sched;
pub mod syscall;
pub mod user;

use craybond_pal::board;
use craybond_pal::{console, println};

/// Scheduler tick used by [`kmain`].
pub const DEFAULT_TICK_MS: u64 = 10;

/// Boot display mode requested when the device does not report one.
pub const DEFAULT_DISPLAY: (u32, u32) = (1024, 768);

/// Kernel entry point, called once from the boot stub with the CPU at
/// EL1, the stack set and BSS zeroed.
pub fn kmain() -> ! {
    console::init();
    println!("craybond: kernel initialising");

    logging::init();

    memory::init();

    // Probe the GPU while the MMU is still off; PCI config space and the
    // BAR windows are reachable without mappings at this point.
    gpu::init(DEFAULT_DISPLAY.0, DEFAULT_DISPLAY.1);

    irq::init();

    // SAFETY: Single call during bring-up, IRQs still masked.
    unsafe { craybond_pal::gic::init(board::TIMER_INTID) };

    memory::mmu::init();

    kprocs::bootscreen::spawn();

    log::info!("kernel initialised, starting scheduler");
    sched::start(DEFAULT_TICK_MS)
}
