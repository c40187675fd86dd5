//! PCI configuration space over ECAM.
//!
//! Configuration addresses compose as
//! `ecam_base | bus << 20 | slot << 15 | func << 12 | offset`. The kernel
//! scans for a device by vendor/device id, walks its capability list and
//! assigns MMIO windows to unprogrammed BARs.

use craybond_arch::IrqSpinMutex;
use craybond_mmio::MmioRegion;
use craybond_pal::board;

/// Buses scanned.
const PCI_BUS_MAX: u32 = 256;
/// Slots per bus.
const PCI_SLOT_MAX: u32 = 32;
/// Functions per slot.
const PCI_FUNC_MAX: u32 = 8;

/// Command register offset.
const PCI_COMMAND: usize = 0x04;
/// Command: memory decoding enable.
const PCI_COMMAND_MEMORY: u32 = 1 << 1;
/// First BAR offset.
const PCI_BAR0: usize = 0x10;
/// Capabilities pointer offset.
const PCI_CAP_PTR: usize = 0x34;

/// Bump pointer over the board's BAR assignment window.
static NEXT_BAR_WINDOW: IrqSpinMutex<u64> = IrqSpinMutex::new(board::PCI_BAR_WINDOW);

/// One discovered PCI function's 4 KiB configuration window.
#[derive(Clone, Copy, Debug)]
pub struct PciDevice {
    cfg: MmioRegion,
}

impl PciDevice {
    /// Read a 32-bit configuration register.
    #[must_use]
    pub fn read32(&self, offset: usize) -> u32 {
        self.cfg.read32(offset)
    }

    /// Read an 8-bit configuration register.
    #[must_use]
    pub fn read8(&self, offset: usize) -> u8 {
        self.cfg.read8(offset)
    }

    /// Write a 32-bit configuration register.
    pub fn write32(&self, offset: usize, value: u32) {
        self.cfg.write32(offset, value);
    }

    /// Capabilities-pointer register (offset of the first capability).
    #[must_use]
    pub fn capabilities_pointer(&self) -> usize {
        (self.read32(PCI_CAP_PTR) & 0xFF) as usize
    }

    /// Current base address programmed in BAR `index`, low nibble masked.
    #[must_use]
    pub fn bar_address(&self, index: u8) -> u64 {
        u64::from(self.read32(Self::bar_offset(index)) & !0xF)
    }

    /// Register offset of BAR `index`.
    #[must_use]
    pub const fn bar_offset(index: u8) -> usize {
        PCI_BAR0 + index as usize * 4
    }

    /// Size-probe an unprogrammed BAR, assign it a fresh window and
    /// enable memory decoding.
    ///
    /// Probe protocol: write all-ones, read back, and the size is
    /// `!(value & !0xF) + 1`. Returns the assigned base, or `None` when
    /// the BAR does not respond to the probe.
    pub fn setup_bar(&self, index: u8) -> Option<u64> {
        let offset = Self::bar_offset(index);

        self.write32(offset, 0xFFFF_FFFF);
        let probe = self.read32(offset);
        if probe == 0 || probe == 0xFFFF_FFFF {
            log::warn!("pci: BAR{index} size probe failed");
            return None;
        }
        let size = u64::from(!(probe & !0xF)) + 1;

        let base = {
            let mut next = NEXT_BAR_WINDOW.lock();
            let base = next.next_multiple_of(size.max(0x1000));
            *next = base + size;
            base
        };

        self.write32(offset, base as u32);
        let programmed = u64::from(self.read32(offset) & !0xF);

        self.cfg
            .modify32(PCI_COMMAND, |cmd| cmd | PCI_COMMAND_MEMORY);

        log::debug!("pci: BAR{index} sized {size:#x}, assigned {programmed:#x}");
        Some(programmed)
    }
}

/// The whole ECAM window.
fn ecam() -> MmioRegion {
    // SAFETY: Fixed platform window (256 MiB of configuration space).
    unsafe { MmioRegion::new(board::ECAM_BASE as usize, 0x1000_0000) }
}

/// Scan every bus/slot/function for `vendor:device`.
#[must_use]
pub fn find_device(vendor: u16, device: u16) -> Option<PciDevice> {
    let ecam = ecam();
    let wanted = (u32::from(device) << 16) | u32::from(vendor);

    for bus in 0..PCI_BUS_MAX {
        for slot in 0..PCI_SLOT_MAX {
            for func in 0..PCI_FUNC_MAX {
                let offset = ((bus << 20) | (slot << 15) | (func << 12)) as usize;
                let cfg = ecam.subregion(offset, 0x1000);
                if cfg.read32(0) == wanted {
                    log::info!("pci: {vendor:04x}:{device:04x} at bus {bus} slot {slot} func {func}");
                    return Some(PciDevice { cfg });
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_offsets_follow_the_header_layout() {
        assert_eq!(PciDevice::bar_offset(0), 0x10);
        assert_eq!(PciDevice::bar_offset(4), 0x20);
        assert_eq!(PciDevice::bar_offset(5), 0x24);
    }

    #[test]
    fn bar_size_probe_formula() {
        // A 16 KiB BAR reads back 0xFFFF_C000 after the all-ones write
        // (low nibble carries the type bits).
        let probe = 0xFFFF_C004u32;
        let size = u64::from(!(probe & !0xF)) + 1;
        assert_eq!(size, 0x4000);
    }
}
