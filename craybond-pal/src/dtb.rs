//! Device tree parsing.
//!
//! The firmware leaves a flattened device tree at the bottom of RAM. The
//! kernel reads the `memory` node for the RAM window and enumerates
//! `virtio_mmio` transports; everything else it knows about the board is
//! fixed by the platform constants.

use fdt::Fdt;

use crate::board;

/// Device tree access failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtbError {
    /// Bad magic or malformed structure block.
    Invalid,
    /// The `memory` node or its `reg` property is missing.
    NoMemoryNode,
}

/// A `virtio_mmio` transport window and its interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtioMmioSlot {
    /// Register window base.
    pub base: u64,
    /// Register window size.
    pub size: u64,
    /// SPI number from the `interrupts` property (add 32 for the INTID).
    pub irq: u32,
}

/// Parse the blob at the platform's DTB address.
///
/// # Safety
///
/// The platform DTB address must hold a device tree (the virt firmware
/// guarantees this); the blob must stay untouched for the `'static`
/// lifetime of the returned handle.
pub unsafe fn parse() -> Result<Fdt<'static>, DtbError> {
    // SAFETY: Caller contract; `from_ptr` reads the header for the size.
    unsafe { Fdt::from_ptr(board::DTB_BASE as *const u8) }.map_err(|_| DtbError::Invalid)
}

/// Total RAM `(base, size)` from the `memory` node's `reg` property.
pub fn memory_region(fdt: &Fdt<'_>) -> Result<(u64, u64), DtbError> {
    let region = fdt
        .memory()
        .regions()
        .next()
        .ok_or(DtbError::NoMemoryNode)?;
    let size = region.size.ok_or(DtbError::NoMemoryNode)? as u64;
    Ok((region.starting_address as u64, size))
}

/// Enumerate `virtio_mmio` transports: `reg` window plus interrupt.
///
/// The interrupts property for these nodes is three cells
/// `(kind, number, flags)`; the middle cell is the SPI number.
pub fn virtio_mmio_slots<'a>(fdt: &'a Fdt<'a>) -> impl Iterator<Item = VirtioMmioSlot> + 'a {
    fdt.all_nodes()
        .filter(|node| node.name.split('@').next() == Some("virtio_mmio"))
        .filter_map(|node| {
            let reg = node.reg()?.next()?;
            let irq = node.interrupts()?.nth(1)? as u32;
            Some(VirtioMmioSlot {
                base: reg.starting_address as u64,
                size: reg.size? as u64,
                irq,
            })
        })
}
