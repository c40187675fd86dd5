//! The GPU capability.
//!
//! A single "gpu" interface over two backends: the VirtIO-GPU-PCI driver
//! when the device exists, the fw-cfg ramfb otherwise. Drawing happens on
//! a linear framebuffer either way; [`Gpu::flush`] pushes the frame
//! through whichever backend owns the display.
//!
//! The panic path calls [`disable_visual`] before reporting, so a crash
//! never re-enters a half-configured driver; the flag is an atomic, not a
//! lock, for exactly that reason.

pub mod protocol;
pub mod queue;
pub mod ramfb;
pub mod virtio;

use core::sync::atomic::{AtomicBool, Ordering};

use craybond_arch::IrqSpinMutex;
use craybond_mmio::MmioRegion;
use craybond_pal::fwcfg::FwCfgError;

use crate::gfx::{Framebuffer, Point};
use ramfb::Ramfb;
use virtio::VirtioGpu;

/// GPU initialisation and command failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuError {
    /// No device behind this backend.
    NotFound,
    /// The device never answered within the poll budget.
    Timeout,
    /// A required PCI capability or BAR could not be set up.
    Capability(&'static str),
    /// The device refused the FEATURES_OK handshake.
    FeaturesRejected,
    /// A command response carried an unexpected type.
    BadResponse(u32),
    /// fw-cfg access failed (ramfb backend).
    Firmware(FwCfgError),
}

impl core::fmt::Display for GpuError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "device not found"),
            Self::Timeout => write!(f, "device did not respond"),
            Self::Capability(what) => write!(f, "capability setup failed: {what}"),
            Self::FeaturesRejected => write!(f, "device rejected FEATURES_OK"),
            Self::BadResponse(t) => write!(f, "unexpected response type {t:#x}"),
            Self::Firmware(err) => write!(f, "fw-cfg error: {err:?}"),
        }
    }
}

enum Backend {
    Virtio(VirtioGpu),
    Ramfb(Ramfb),
}

/// The active display: a framebuffer plus the backend that scans it out.
pub struct Gpu {
    backend: Backend,
    fb: Framebuffer,
}

impl Gpu {
    /// `(width, height)` of the display.
    #[must_use]
    pub fn screen_size(&self) -> (u32, u32) {
        self.fb.size()
    }

    /// The framebuffer drawing surface.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    /// Fill the screen and push the frame out.
    pub fn clear(&mut self, color: u32) {
        self.fb.clear(color);
        self.flush();
    }

    /// Set one pixel.
    pub fn draw_pixel(&mut self, x: i32, y: i32, color: u32) {
        self.fb.draw_pixel(x, y, color);
    }

    /// Fill a rectangle.
    pub fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: u32) {
        self.fb.fill_rect(x, y, w, h, color);
    }

    /// Draw a line.
    pub fn draw_line(&mut self, from: Point, to: Point, color: u32) {
        self.fb.draw_line(from, to, color);
    }

    /// Draw one character.
    pub fn draw_char(&mut self, x: i32, y: i32, c: u8, scale: u32, color: u32) {
        self.fb.draw_char(x, y, c, scale, color);
    }

    /// Draw a string.
    pub fn draw_string(&mut self, origin: Point, s: &str, scale: u32, color: u32) {
        self.fb.draw_string(origin, s, scale, color);
    }

    /// Push the current frame to the display.
    pub fn flush(&mut self) {
        match &mut self.backend {
            Backend::Virtio(gpu) => {
                if let Err(err) = gpu.flush_frame() {
                    log::warn!("gpu: frame flush failed: {err}");
                }
            }
            // The host scans the ramfb memory directly.
            Backend::Ramfb(_) => {}
        }
    }
}

static GPU: IrqSpinMutex<Option<Gpu>> = IrqSpinMutex::new(None);

/// Graphical output gate. Cleared by the panic path.
static VISUAL: AtomicBool = AtomicBool::new(true);

/// Probe for a display: VirtIO GPU first, ramfb as the fallback.
pub fn init(width: u32, height: u32) {
    let gpu = match VirtioGpu::init(width, height) {
        Ok(gpu) => {
            let (w, h) = gpu.display_size();
            // SAFETY: The driver allocated `w * h * 4` bytes of
            // permanent-arena framebuffer.
            let fb = unsafe { Framebuffer::new(gpu.framebuffer_base(), w, h) };
            log::info!("gpu: virtio-gpu at {w}x{h}");
            Some(Gpu {
                backend: Backend::Virtio(gpu),
                fb,
            })
        }
        Err(GpuError::NotFound) => match Ramfb::init(width, height) {
            Ok(ramfb) => {
                // SAFETY: As above, sized by the ramfb driver.
                let fb = unsafe { Framebuffer::new(ramfb.framebuffer_base(), width, height) };
                log::info!("gpu: ramfb fallback at {width}x{height}");
                Some(Gpu {
                    backend: Backend::Ramfb(ramfb),
                    fb,
                })
            }
            Err(err) => {
                log::warn!("gpu: no display available: {err}");
                None
            }
        },
        Err(err) => {
            log::warn!("gpu: virtio-gpu init failed: {err}");
            None
        }
    };

    *GPU.lock() = gpu;
}

/// Run `f` against the display, if one is initialised and visual output
/// has not been disabled by the panic path.
pub fn with<R>(f: impl FnOnce(&mut Gpu) -> R) -> Option<R> {
    if !VISUAL.load(Ordering::Acquire) {
        return None;
    }
    let mut gpu = GPU.lock();
    gpu.as_mut().map(f)
}

/// Turn off the graphical output path (crash reporting goes UART-only).
pub fn disable_visual() {
    VISUAL.store(false, Ordering::Release);
}

/// The MMIO windows the active backend needs mapped once translation is
/// enabled.
#[must_use]
pub fn mmio_windows() -> [Option<MmioRegion>; 4] {
    let gpu = GPU.lock();
    match gpu.as_ref() {
        Some(Gpu {
            backend: Backend::Virtio(virtio),
            ..
        }) => virtio.mmio_windows(),
        _ => [None; 4],
    }
}
