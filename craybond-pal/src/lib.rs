//! # craybond-pal
//!
//! Platform access layer for the AArch64 "virt" board.
//!
//! Everything that knows a board address lives here: the PL011 console,
//! device-tree parsing, the GICv2 interrupt controller, the EL1 physical
//! timer and the fw-cfg firmware interface. The kernel above sees
//! functions and types, never addresses.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod dtb;
pub mod fwcfg;
pub mod gic;
pub mod timer;
pub mod uart;

/// Board addresses for the "virt" machine.
pub mod board {
    /// PL011 UART register window.
    pub const UART0_BASE: usize = 0x0900_0000;
    /// UART window size (one 4 KiB page).
    pub const UART0_SIZE: usize = 0x1000;

    /// GIC distributor.
    pub const GICD_BASE: usize = 0x0800_0000;
    /// GIC distributor window size.
    pub const GICD_SIZE: usize = 0x1_0000;

    /// GIC CPU interface.
    pub const GICC_BASE: usize = 0x0801_0000;
    /// GIC CPU interface window size.
    pub const GICC_SIZE: usize = 0x2000;

    /// fw-cfg register window (data port at +0, selector at +8, DMA at +16).
    pub const FW_CFG_BASE: usize = 0x0902_0000;
    /// fw-cfg window size (one 4 KiB page).
    pub const FW_CFG_SIZE: usize = 0x1000;

    /// PCIe ECAM window (high MMIO). Fallback when firmware tables are not
    /// consulted; matches the virt board's fixed layout.
    pub const ECAM_BASE: u64 = 0x40_1000_0000;

    /// MMIO window the kernel hands out to unassigned PCI BARs.
    pub const PCI_BAR_WINDOW: u64 = 0x1001_0000;

    /// Flattened device tree blob, at the bottom of RAM.
    pub const DTB_BASE: usize = 0x4000_0000;

    /// Private timer interrupt (PPI 14, INTID 30).
    pub const TIMER_INTID: u32 = 30;
}
