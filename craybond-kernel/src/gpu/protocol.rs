//! VirtIO-GPU wire protocol.
//!
//! Command and response structures as the device reads them from the
//! virtqueue, plus the command/response codes and status bits. All
//! structures are `#[repr(C)]` with explicit padding so the byte view is
//! exactly the wire layout.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

// Device status bits.
pub const STATUS_ACKNOWLEDGE: u8 = 1;
pub const STATUS_DRIVER: u8 = 2;
pub const STATUS_DRIVER_OK: u8 = 4;
pub const STATUS_FEATURES_OK: u8 = 8;
pub const STATUS_FAILED: u8 = 0x80;

// Command types.
pub const CMD_GET_DISPLAY_INFO: u32 = 0x0100;
pub const CMD_RESOURCE_CREATE_2D: u32 = 0x0101;
pub const CMD_SET_SCANOUT: u32 = 0x0102;
pub const CMD_RESOURCE_FLUSH: u32 = 0x0103;
pub const CMD_TRANSFER_TO_HOST_2D: u32 = 0x0104;
pub const CMD_RESOURCE_ATTACH_BACKING: u32 = 0x0106;

// Response types.
pub const RESP_OK_NODATA: u32 = 0x1100;
pub const RESP_OK_DISPLAY_INFO: u32 = 0x1101;

/// Pixel format B8G8R8A8_UNORM.
pub const FORMAT_B8G8R8A8_UNORM: u32 = 1;

/// Scanouts a display-info response can describe.
pub const MAX_SCANOUTS: usize = 16;

/// Common header leading every command and response.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CtrlHdr {
    pub type_: u32,
    pub flags: u32,
    pub fence_id: u64,
    pub ctx_id: u32,
    pub ring_idx: u8,
    pub padding: [u8; 3],
}

impl CtrlHdr {
    /// A command header with everything but the type zeroed.
    #[must_use]
    pub fn command(type_: u32) -> Self {
        Self {
            type_,
            ..Self::default()
        }
    }
}

/// A rectangle on a scanout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// The full-screen rectangle for a display of the given size.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// One display head in the display-info response.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DisplayOne {
    pub r: Rect,
    pub enabled: u32,
    pub flags: u32,
}

/// Response to `GET_DISPLAY_INFO`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RespDisplayInfo {
    pub hdr: CtrlHdr,
    pub pmodes: [DisplayOne; MAX_SCANOUTS],
}

/// `RESOURCE_CREATE_2D`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ResourceCreate2d {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

/// `RESOURCE_ATTACH_BACKING`, followed on the wire by `nr_entries`
/// [`MemEntry`] records.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AttachBacking {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub nr_entries: u32,
}

/// One guest-memory span backing a resource.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MemEntry {
    pub addr: u64,
    pub length: u32,
    pub padding: u32,
}

/// `SET_SCANOUT`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SetScanout {
    pub hdr: CtrlHdr,
    pub r: Rect,
    pub scanout_id: u32,
    pub resource_id: u32,
}

/// `TRANSFER_TO_HOST_2D`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TransferToHost2d {
    pub hdr: CtrlHdr,
    pub r: Rect,
    pub offset: u64,
    pub resource_id: u32,
    pub padding: u32,
}

/// `RESOURCE_FLUSH`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ResourceFlush {
    pub hdr: CtrlHdr,
    pub r: Rect,
    pub resource_id: u32,
    pub padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn wire_sizes_match_the_device_contract() {
        assert_eq!(size_of::<CtrlHdr>(), 24);
        assert_eq!(size_of::<Rect>(), 16);
        assert_eq!(size_of::<DisplayOne>(), 24);
        assert_eq!(size_of::<RespDisplayInfo>(), 24 + 16 * 24);
        assert_eq!(size_of::<ResourceCreate2d>(), 40);
        assert_eq!(size_of::<AttachBacking>(), 32);
        assert_eq!(size_of::<MemEntry>(), 16);
        assert_eq!(size_of::<SetScanout>(), 48);
        assert_eq!(size_of::<TransferToHost2d>(), 56);
        assert_eq!(size_of::<ResourceFlush>(), 48);
    }

    #[test]
    fn display_one_puts_the_rect_first() {
        // The enabled flag sits after the rectangle; reading it from the
        // rect's x field is the classic mistake this layout test pins.
        let mode = DisplayOne {
            r: Rect {
                x: 0,
                y: 0,
                width: 1024,
                height: 768,
            },
            enabled: 1,
            flags: 0,
        };
        let bytes = mode.as_bytes();
        assert_eq!(&bytes[8..12], &1024u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_le_bytes());
    }
}
