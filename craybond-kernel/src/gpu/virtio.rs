//! VirtIO-GPU-PCI driver.
//!
//! Finds the device in PCI configuration space, walks its vendor
//! capability list to locate the common/notify/ISR/device configuration
//! windows, performs the status handshake, sets up one virtqueue, and
//! drives the display through the command sequence
//! `GET_DISPLAY_INFO -> RESOURCE_CREATE_2D -> RESOURCE_ATTACH_BACKING ->
//! SET_SCANOUT`, with `TRANSFER_TO_HOST_2D` + `RESOURCE_FLUSH` per
//! frame.
//!
//! Single-threaded contract: one task owns the queue and the command
//! buffers; callers above serialise through the GPU lock.

use core::ptr;

use craybond_arch::cpu::dmb_sy;
use craybond_mmio::MmioRegion;
use zerocopy::{Immutable, IntoBytes};

use super::GpuError;
use super::protocol::{self as proto, CtrlHdr, MemEntry, Rect};
use super::queue::{QUEUE_LEN, VIRTQ_DESC_F_NEXT, Virtqueue};
use crate::memory;
use crate::pci::{self, PciDevice};

/// virtio vendor id.
const VENDOR_ID: u16 = 0x1AF4;
/// virtio-gpu device id (0x1040 base + 0x10).
const DEVICE_ID: u16 = 0x1050;

/// The single 2D resource backing the screen.
const RESOURCE_ID: u32 = 1;

/// PCI vendor-specific capability id.
const CAP_ID_VENDOR: u8 = 0x09;

// Vendor capability cfg_type values.
const CAP_COMMON_CFG: u8 = 1;
const CAP_NOTIFY_CFG: u8 = 2;
const CAP_ISR_CFG: u8 = 3;
const CAP_DEVICE_CFG: u8 = 4;

// Common configuration window offsets.
const COMMON_DEVICE_FEATURE_SELECT: usize = 0x00;
const COMMON_DEVICE_FEATURE: usize = 0x04;
const COMMON_DRIVER_FEATURE_SELECT: usize = 0x08;
const COMMON_DRIVER_FEATURE: usize = 0x0C;
const COMMON_DEVICE_STATUS: usize = 0x14;
const COMMON_QUEUE_SELECT: usize = 0x16;
const COMMON_QUEUE_SIZE: usize = 0x18;
const COMMON_QUEUE_ENABLE: usize = 0x1C;
const COMMON_QUEUE_NOTIFY_OFF: usize = 0x1E;
const COMMON_QUEUE_DESC: usize = 0x20;
const COMMON_QUEUE_DRIVER: usize = 0x28;
const COMMON_QUEUE_DEVICE: usize = 0x30;

/// Budget for the device-status reset poll.
const RESET_POLL_LIMIT: usize = 1_000_000;

/// Configuration windows discovered in the capability walk.
#[derive(Default)]
struct Capabilities {
    common: Option<MmioRegion>,
    notify: Option<MmioRegion>,
    notify_off_multiplier: u32,
    isr: Option<MmioRegion>,
    device: Option<MmioRegion>,
}

/// The driver state for one virtio-gpu function.
pub struct VirtioGpu {
    common: MmioRegion,
    isr: MmioRegion,
    device_cfg: MmioRegion,
    notify: MmioRegion,
    queue: Virtqueue,
    /// Request buffer (descriptor 0), one page.
    cmd_buf: u64,
    /// Response buffer (descriptor 1), one page.
    resp_buf: u64,
    /// Display-info response buffer.
    info_buf: u64,
    width: u32,
    height: u32,
    scanout_id: u32,
    scanout_found: bool,
    framebuffer: u64,
}

impl VirtioGpu {
    /// Locate, handshake and configure the device, then bring up the
    /// scanout at the advertised (or fallback) resolution.
    pub fn init(fallback_width: u32, fallback_height: u32) -> Result<Self, GpuError> {
        let device = pci::find_device(VENDOR_ID, DEVICE_ID).ok_or(GpuError::NotFound)?;
        let caps = walk_capabilities(&device)?;

        let common = caps.common.ok_or(GpuError::Capability("common cfg"))?;
        let notify = caps.notify.ok_or(GpuError::Capability("notify cfg"))?;
        let isr = caps.isr.ok_or(GpuError::Capability("isr cfg"))?;
        let device_cfg = caps.device.ok_or(GpuError::Capability("device cfg"))?;

        let queue = negotiate(common, notify, caps.notify_off_multiplier)?;

        let mut gpu = Self {
            common,
            isr,
            device_cfg,
            notify,
            queue,
            cmd_buf: memory::perm_alloc(0x1000),
            resp_buf: memory::perm_alloc(0x1000),
            info_buf: memory::perm_alloc(core::mem::size_of::<proto::RespDisplayInfo>() as u64),
            width: fallback_width,
            height: fallback_height,
            scanout_id: 0,
            scanout_found: false,
            framebuffer: 0,
        };

        gpu.get_display_info()?;

        gpu.framebuffer = memory::perm_alloc(gpu.framebuffer_len());

        gpu.create_2d_resource()?;
        gpu.attach_backing()?;
        if gpu.scanout_found {
            gpu.set_scanout()?;
        } else {
            log::warn!("virtio-gpu: no enabled scanout reported, output stays off-screen");
        }
        gpu.flush_frame()?;

        log::info!("virtio-gpu: scanout {} at {}x{}", gpu.scanout_id, gpu.width, gpu.height);
        Ok(gpu)
    }

    /// Display `(width, height)`.
    #[must_use]
    pub const fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Framebuffer base (permanent-arena memory).
    #[must_use]
    pub const fn framebuffer_base(&self) -> u64 {
        self.framebuffer
    }

    /// Framebuffer size in bytes.
    #[must_use]
    pub const fn framebuffer_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }

    /// Windows that must be device-mapped once the MMU is on.
    #[must_use]
    pub fn mmio_windows(&self) -> [Option<MmioRegion>; 4] {
        [
            Some(self.common),
            Some(self.notify),
            Some(self.isr),
            Some(self.device_cfg),
        ]
    }

    /// Push the frame: transfer the resource to the host, then flush it
    /// to the scanout.
    pub fn flush_frame(&mut self) -> Result<(), GpuError> {
        let rect = Rect::full(self.width, self.height);

        let transfer = proto::TransferToHost2d {
            hdr: CtrlHdr::command(proto::CMD_TRANSFER_TO_HOST_2D),
            r: rect,
            offset: 0,
            resource_id: RESOURCE_ID,
            padding: 0,
        };
        self.command_ok(&transfer)?;

        let flush = proto::ResourceFlush {
            hdr: CtrlHdr::command(proto::CMD_RESOURCE_FLUSH),
            r: rect,
            resource_id: RESOURCE_ID,
            padding: 0,
        };
        self.command_ok(&flush)
    }

    /// `GET_DISPLAY_INFO`: adopt the first enabled scanout, or keep the
    /// fallback mode with the scanout flagged absent.
    fn get_display_info(&mut self) -> Result<(), GpuError> {
        let cmd = CtrlHdr::command(proto::CMD_GET_DISPLAY_INFO);
        let resp_len = core::mem::size_of::<proto::RespDisplayInfo>() as u32;
        let resp_type = self.submit(cmd.as_bytes(), &[], self.info_buf, resp_len)?;
        if resp_type != proto::RESP_OK_DISPLAY_INFO {
            return Err(GpuError::BadResponse(resp_type));
        }

        // SAFETY: info_buf is a live permanent allocation of exactly this
        // type's size, just written by the device.
        let info = unsafe { ptr::read_volatile(self.info_buf as *const proto::RespDisplayInfo) };
        for (index, mode) in info.pmodes.iter().enumerate() {
            if mode.enabled != 0 {
                log::info!(
                    "virtio-gpu: scanout {index} enabled at {}x{}",
                    mode.r.width,
                    mode.r.height
                );
                self.width = mode.r.width;
                self.height = mode.r.height;
                self.scanout_id = index as u32;
                self.scanout_found = true;
                return Ok(());
            }
        }

        log::warn!(
            "virtio-gpu: no scanout enabled, defaulting to {}x{}",
            self.width,
            self.height
        );
        self.scanout_found = false;
        Ok(())
    }

    fn create_2d_resource(&mut self) -> Result<(), GpuError> {
        let cmd = proto::ResourceCreate2d {
            hdr: CtrlHdr::command(proto::CMD_RESOURCE_CREATE_2D),
            resource_id: RESOURCE_ID,
            format: proto::FORMAT_B8G8R8A8_UNORM,
            width: self.width,
            height: self.height,
        };
        self.command_ok(&cmd)
    }

    fn attach_backing(&mut self) -> Result<(), GpuError> {
        let cmd = proto::AttachBacking {
            hdr: CtrlHdr::command(proto::CMD_RESOURCE_ATTACH_BACKING),
            resource_id: RESOURCE_ID,
            nr_entries: 1,
        };
        let entry = MemEntry {
            addr: self.framebuffer,
            length: self.framebuffer_len() as u32,
            padding: 0,
        };
        let resp = self.submit_with_resp(cmd.as_bytes(), entry.as_bytes())?;
        expect_ok_nodata(resp)
    }

    fn set_scanout(&mut self) -> Result<(), GpuError> {
        let cmd = proto::SetScanout {
            hdr: CtrlHdr::command(proto::CMD_SET_SCANOUT),
            r: Rect::full(self.width, self.height),
            scanout_id: self.scanout_id,
            resource_id: RESOURCE_ID,
        };
        self.command_ok(&cmd)
    }

    /// Send a command expecting a bare OK header back.
    fn command_ok<T: IntoBytes + Immutable>(&mut self, cmd: &T) -> Result<(), GpuError> {
        let resp = self.submit_with_resp(cmd.as_bytes(), &[])?;
        expect_ok_nodata(resp)
    }

    fn submit_with_resp(&mut self, cmd: &[u8], extra: &[u8]) -> Result<u32, GpuError> {
        let resp_len = core::mem::size_of::<CtrlHdr>() as u32;
        let resp_buf = self.resp_buf;
        self.submit(cmd, extra, resp_buf, resp_len)
    }

    /// Copy the command (plus trailing payload) into the request buffer,
    /// run it through the queue and return the response header type.
    fn submit(
        &mut self,
        cmd: &[u8],
        extra: &[u8],
        resp_buf: u64,
        resp_len: u32,
    ) -> Result<u32, GpuError> {
        let total = cmd.len() + extra.len();
        debug_assert!(total <= 0x1000);

        // SAFETY: cmd_buf is one page of permanent-arena memory owned by
        // this driver.
        unsafe {
            ptr::copy_nonoverlapping(cmd.as_ptr(), self.cmd_buf as *mut u8, cmd.len());
            ptr::copy_nonoverlapping(
                extra.as_ptr(),
                (self.cmd_buf as *mut u8).add(cmd.len()),
                extra.len(),
            );
        }

        self.queue.submit(
            self.cmd_buf,
            total as u32,
            VIRTQ_DESC_F_NEXT,
            resp_buf,
            resp_len,
        )?;

        // The device has written the response; order the read after the
        // used-index observation.
        dmb_sy();
        // SAFETY: resp_buf is a live buffer at least one header long.
        let hdr = unsafe { ptr::read_volatile(resp_buf as *const CtrlHdr) };
        Ok(hdr.type_)
    }
}

fn expect_ok_nodata(resp_type: u32) -> Result<(), GpuError> {
    if resp_type == proto::RESP_OK_NODATA {
        Ok(())
    } else {
        log::warn!("virtio-gpu: command failed with response {resp_type:#x}");
        Err(GpuError::BadResponse(resp_type))
    }
}

/// Follow the capability list and collect the virtio configuration
/// windows, assigning BARs as needed.
fn walk_capabilities(device: &PciDevice) -> Result<Capabilities, GpuError> {
    let mut caps = Capabilities::default();

    let mut offset = device.capabilities_pointer();
    while offset != 0 {
        let cap_id = device.read8(offset);
        let cap_next = device.read8(offset + 1);
        let cfg_type = device.read8(offset + 3);
        let bar = device.read8(offset + 4);

        if cap_id == CAP_ID_VENDOR && (CAP_COMMON_CFG..=CAP_DEVICE_CFG).contains(&cfg_type) {
            let window_offset = device.read32(offset + 8);
            let window_len = device.read32(offset + 12);

            let mut base = device.bar_address(bar);
            if base == 0 {
                base = device
                    .setup_bar(bar)
                    .ok_or(GpuError::Capability("BAR assignment"))?;
            }

            // SAFETY: The window lies inside a BAR the device decodes.
            let window = unsafe {
                MmioRegion::new((base + u64::from(window_offset)) as usize, window_len as usize)
            };

            match cfg_type {
                CAP_COMMON_CFG => caps.common = Some(window),
                CAP_NOTIFY_CFG => {
                    caps.notify = Some(window);
                    // The multiplier follows the 16-byte capability
                    // structure.
                    caps.notify_off_multiplier = device.read32(offset + 16);
                }
                CAP_ISR_CFG => caps.isr = Some(window),
                CAP_DEVICE_CFG => caps.device = Some(window),
                _ => {}
            }
        }

        offset = cap_next as usize;
    }

    Ok(caps)
}

/// The status handshake and queue programming.
fn negotiate(
    common: MmioRegion,
    notify: MmioRegion,
    notify_off_multiplier: u32,
) -> Result<Virtqueue, GpuError> {
    // Reset and wait for the device to acknowledge it.
    common.write8(COMMON_DEVICE_STATUS, 0);
    if !common.poll8(COMMON_DEVICE_STATUS, |s| s == 0, RESET_POLL_LIMIT) {
        return Err(GpuError::Timeout);
    }

    set_status(common, proto::STATUS_ACKNOWLEDGE);
    set_status(common, proto::STATUS_DRIVER);

    // Feature negotiation: echo the first feature word back.
    common.write32(COMMON_DEVICE_FEATURE_SELECT, 0);
    let features = common.read32(COMMON_DEVICE_FEATURE);
    common.write32(COMMON_DRIVER_FEATURE_SELECT, 0);
    common.write32(COMMON_DRIVER_FEATURE, features);

    set_status(common, proto::STATUS_FEATURES_OK);
    if common.read8(COMMON_DEVICE_STATUS) & proto::STATUS_FEATURES_OK == 0 {
        set_status(common, proto::STATUS_FAILED);
        return Err(GpuError::FeaturesRejected);
    }

    // Queue 0: clamp the size to what the rings hold and hand the device
    // its ring addresses.
    common.write16(COMMON_QUEUE_SELECT, 0);
    let device_size = common.read16(COMMON_QUEUE_SIZE);
    let size = device_size.min(QUEUE_LEN as u16);
    common.write16(COMMON_QUEUE_SIZE, size);

    let desc = memory::perm_alloc(0x1000);
    let avail = memory::perm_alloc(0x1000);
    let used = memory::perm_alloc(0x1000);
    // SAFETY: Fresh permanent pages, exclusively ours; the rings must
    // start out zeroed.
    unsafe {
        ptr::write_bytes(desc as *mut u8, 0, 0x1000);
        ptr::write_bytes(avail as *mut u8, 0, 0x1000);
        ptr::write_bytes(used as *mut u8, 0, 0x1000);
    }

    common.write64(COMMON_QUEUE_DESC, desc);
    common.write64(COMMON_QUEUE_DRIVER, avail);
    common.write64(COMMON_QUEUE_DEVICE, used);

    let notify_off = common.read16(COMMON_QUEUE_NOTIFY_OFF);
    common.write16(COMMON_QUEUE_ENABLE, 1);

    set_status(common, proto::STATUS_DRIVER_OK);

    log::debug!("virtio-gpu: queue 0 size {size} (device offered {device_size})");

    // SAFETY: Ring addresses are the ones just programmed; size <=
    // QUEUE_LEN by the clamp.
    Ok(unsafe {
        Virtqueue::new(
            desc,
            avail,
            used,
            size,
            notify,
            notify_off as usize * notify_off_multiplier as usize,
        )
    })
}

fn set_status(common: MmioRegion, bit: u8) {
    let status = common.read8(COMMON_DEVICE_STATUS);
    common.write8(COMMON_DEVICE_STATUS, status | bit);
}
