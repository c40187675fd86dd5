//! # craybond-mmio
//!
//! Typed volatile MMIO windows.
//!
//! Device registers are reached exclusively through [`MmioRegion`]: a base
//! address plus length, with width-parameterised volatile accessors and
//! bounded polling. Raw pointer arithmetic into device memory does not
//! appear anywhere else in the kernel.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

mod region;

pub use region::MmioRegion;
