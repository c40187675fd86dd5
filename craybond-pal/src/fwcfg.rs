//! Firmware configuration (fw-cfg) interface.
//!
//! The firmware exposes a selector, a data port and a DMA control
//! register. Requests are `{control, length, address}` triples, all
//! big-endian, written by address to the DMA register; completion is
//! signalled by the device clearing the control word in place.
//!
//! The kernel uses the directory listing (selector 0x19) to locate files
//! such as `etc/ramfb`, then reads or writes their contents by selector.

use craybond_arch::cpu::{dsb_sy, isb};
use craybond_mmio::MmioRegion;
use spin::Once;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::board;

/// Data port offset.
const DATA: usize = 0x0;
/// DMA address register offset (64-bit, big-endian).
const DMA: usize = 0x10;

/// DMA control: error flag.
const CTL_ERROR: u32 = 0x01;
/// DMA control: read operation.
const CTL_READ: u32 = 0x02;
/// DMA control: select the item in the high half-word.
const CTL_SELECT: u32 = 0x08;
/// DMA control: write operation.
const CTL_WRITE: u32 = 0x10;

/// Directory listing selector.
const SELECTOR_DIRECTORY: u16 = 0x19;

/// "QEMU" signature read from the data port.
const SIGNATURE: u64 = 0x554D_4551;

/// Completion poll budget. DMA to guest RAM completes in-process; this
/// bound only converts a broken device into an error.
const DMA_POLL_LIMIT: usize = 1_000_000;

/// fw-cfg access failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FwCfgError {
    /// Signature probe failed; no fw-cfg device on this board.
    NotPresent,
    /// The device reported an error or never completed the request.
    DmaFailed,
    /// No directory entry matched the requested name.
    FileNotFound,
}

/// One directory entry, as the device lays it out (big-endian fields).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FwCfgFile {
    size_be: u32,
    selector_be: u16,
    reserved: u16,
    name: [u8; 56],
}

impl FwCfgFile {
    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        u32::from_be(self.size_be)
    }

    /// Selector to address this file's contents.
    #[must_use]
    pub fn selector(&self) -> u16 {
        u16::from_be(self.selector_be)
    }

    /// File name (NUL-padded).
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(56);
        &self.name[..len]
    }
}

/// DMA request descriptor, read by the device (big-endian fields).
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
struct DmaAccess {
    control_be: u32,
    length_be: u32,
    address_be: u64,
}

struct FwCfg {
    regs: MmioRegion,
}

static FW_CFG: Once<Option<FwCfg>> = Once::new();

/// Probe the device, caching the result.
fn device() -> Result<&'static FwCfg, FwCfgError> {
    let slot = FW_CFG.call_once(|| {
        // SAFETY: Fixed device window on this platform.
        let regs = unsafe { MmioRegion::new(board::FW_CFG_BASE, board::FW_CFG_SIZE) };
        if regs.read64(DATA) == SIGNATURE {
            Some(FwCfg { regs })
        } else {
            None
        }
    });
    slot.as_ref().ok_or(FwCfgError::NotPresent)
}

/// Submit one DMA request and wait for completion.
fn dma_operation(buffer: *mut u8, length: u32, control: u32) -> Result<(), FwCfgError> {
    let fw = device()?;

    let mut access = DmaAccess {
        control_be: control.to_be(),
        length_be: length.to_be(),
        address_be: (buffer as u64).to_be(),
    };

    // The descriptor and (for writes) the buffer must be visible to the
    // device before it is signalled.
    dsb_sy();
    fw.regs
        .write64(DMA, (core::ptr::from_mut(&mut access) as u64).to_be());
    isb();

    // The device clears control (or leaves only the error bit) in place.
    let mut remaining = DMA_POLL_LIMIT;
    loop {
        // SAFETY: `access` is live for the whole loop.
        let control = u32::from_be(unsafe { core::ptr::read_volatile(&access.control_be) });
        if control & !CTL_ERROR == 0 {
            if control & CTL_ERROR != 0 {
                return Err(FwCfgError::DmaFailed);
            }
            return Ok(());
        }
        remaining -= 1;
        if remaining == 0 {
            return Err(FwCfgError::DmaFailed);
        }
        core::hint::spin_loop();
    }
}

/// Select `selector` and DMA-read `buffer.len()` bytes of it.
pub fn read_selector(selector: u16, buffer: &mut [u8]) -> Result<(), FwCfgError> {
    dma_operation(
        buffer.as_mut_ptr(),
        buffer.len() as u32,
        (u32::from(selector) << 16) | CTL_SELECT | CTL_READ,
    )
}

/// Continue reading from the current selector position.
fn read_continue(buffer: &mut [u8]) -> Result<(), FwCfgError> {
    dma_operation(buffer.as_mut_ptr(), buffer.len() as u32, CTL_READ)
}

/// Select `selector` and DMA-write `buffer` to it.
pub fn write_selector(selector: u16, buffer: &[u8]) -> Result<(), FwCfgError> {
    dma_operation(
        buffer.as_ptr().cast_mut(),
        buffer.len() as u32,
        (u32::from(selector) << 16) | CTL_SELECT | CTL_WRITE,
    )
}

/// Look up a file in the firmware directory by name.
pub fn find_file(name: &str) -> Result<FwCfgFile, FwCfgError> {
    let mut count_be = [0u8; 4];
    read_selector(SELECTOR_DIRECTORY, &mut count_be)?;
    let count = u32::from_be_bytes(count_be);

    for _ in 0..count {
        let mut entry = FwCfgFile::new_zeroed();
        read_continue(entry.as_mut_bytes())?;
        if entry.name() == name.as_bytes() {
            log::debug!("fw-cfg: {name} at selector {:#x}", entry.selector());
            return Ok(entry);
        }
    }
    Err(FwCfgError::FileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_entry_layout_is_64_bytes() {
        assert_eq!(core::mem::size_of::<FwCfgFile>(), 64);
        assert_eq!(core::mem::size_of::<DmaAccess>(), 16);
    }

    #[test]
    fn entry_fields_decode_big_endian() {
        let mut name = [0u8; 56];
        name[..9].copy_from_slice(b"etc/ramfb");
        let entry = FwCfgFile {
            size_be: 28u32.to_be(),
            selector_be: 0x21u16.to_be(),
            reserved: 0,
            name,
        };
        assert_eq!(entry.size(), 28);
        assert_eq!(entry.selector(), 0x21);
        assert_eq!(entry.name(), b"etc/ramfb");
    }
}
