//! # craybond-arch
//!
//! AArch64 primitives for the Craybond kernel.
//!
//! Everything the rest of the kernel needs from the architecture goes
//! through this crate: system-register access, barriers, cache and TLB
//! maintenance, DAIF control, the exception vector table with its saved
//! context type, and an interrupt-masking spin mutex.
//!
//! Inline assembly is confined to this crate. Functions that emit AArch64
//! instructions are gated on `target_arch = "aarch64"` with explicit
//! fallbacks, so crates built on top of this one can run their unit tests
//! on a host toolchain.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cpu;
pub mod exceptions;
pub mod registers;
pub mod sync;

pub use cpu::halt;
pub use sync::{IrqSpinMutex, IrqSpinMutexGuard};
