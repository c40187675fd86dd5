//! ramfb fallback display.
//!
//! When no VirtIO GPU exists, the firmware's `etc/ramfb` file accepts a
//! framebuffer configuration and the host scans the guest memory out
//! directly. All fields are big-endian on the wire.

use zerocopy::{Immutable, IntoBytes, KnownLayout};

use super::GpuError;
use crate::memory;
use craybond_pal::fwcfg;

/// DRM fourcc XR24 (XRGB8888).
const FOURCC_XR24: u32 =
    (b'X' as u32) | ((b'R' as u32) << 8) | ((b'2' as u32) << 16) | ((b'4' as u32) << 24);

/// The `etc/ramfb` configuration record.
#[repr(C, packed)]
#[derive(Clone, Copy, IntoBytes, Immutable, KnownLayout)]
struct RamfbConfig {
    addr: u64,
    fourcc: u32,
    flags: u32,
    width: u32,
    height: u32,
    stride: u32,
}

/// The ramfb backend: a bare framebuffer the host displays.
pub struct Ramfb {
    framebuffer: u64,
    width: u32,
    height: u32,
}

impl Ramfb {
    /// Allocate the framebuffer and publish it to the firmware.
    pub fn init(width: u32, height: u32) -> Result<Self, GpuError> {
        let file = fwcfg::find_file("etc/ramfb").map_err(|err| match err {
            fwcfg::FwCfgError::FileNotFound | fwcfg::FwCfgError::NotPresent => GpuError::NotFound,
            other => GpuError::Firmware(other),
        })?;

        let stride = width * 4;
        let framebuffer = memory::perm_alloc(u64::from(width) * u64::from(height) * 4);

        let config = RamfbConfig {
            addr: framebuffer.to_be(),
            fourcc: FOURCC_XR24.to_be(),
            flags: 0,
            width: width.to_be(),
            height: height.to_be(),
            stride: stride.to_be(),
        };
        fwcfg::write_selector(file.selector(), config.as_bytes())
            .map_err(GpuError::Firmware)?;

        log::info!("ramfb: configured {width}x{height}, framebuffer at {framebuffer:#x}");
        Ok(Self {
            framebuffer,
            width,
            height,
        })
    }

    /// Framebuffer base address.
    #[must_use]
    pub const fn framebuffer_base(&self) -> u64 {
        self.framebuffer
    }

    /// `(width, height)` of the configured mode.
    #[must_use]
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_record_is_28_bytes_packed() {
        assert_eq!(core::mem::size_of::<RamfbConfig>(), 28);
    }

    #[test]
    fn fourcc_spells_xr24() {
        assert_eq!(FOURCC_XR24.to_le_bytes(), *b"XR24");
    }
}
