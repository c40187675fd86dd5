//! Physical memory: layout, RAM discovery, arena wiring.
//!
//! The linker script reserves a heap window inside the kernel image. The
//! temporary arena gets its first 5 MiB, the permanent arena the rest.
//! User task pages are carved out of the RAM above the image by a page
//! bump allocator and mapped on demand.

pub mod mmu;

use craybond_alloc::{PAGE_SIZE, PermanentArena, TempArena};
use craybond_arch::IrqSpinMutex;
use craybond_pal::dtb;
use spin::Once;

use crate::panic::panic_with_info;

/// Size of the temporary arena at the bottom of the heap window.
pub const TEMP_ARENA_SIZE: u64 = 0x50_0000;

/// Linker-script symbols, as addresses.
///
/// Host builds (unit tests) see fixed representative values instead of
/// the real symbols, which only exist under the kernel linker script.
pub mod layout {
    #[cfg(target_os = "none")]
    mod symbols {
        unsafe extern "C" {
            pub static __kernel_start: u8;
            pub static __kcode_end: u8;
            pub static __heap_bottom: u8;
            pub static __heap_limit: u8;
            pub static __shared_start: u8;
            pub static __shared_end: u8;
            pub static __bootscreen_start: u8;
            pub static __bootscreen_end: u8;
            pub static __kernel_image_end: u8;
        }
    }

    macro_rules! layout_addr {
        ($(#[$doc:meta] $name:ident, $sym:ident, $host:expr;)*) => {
            $(
                #[$doc]
                #[must_use]
                pub fn $name() -> u64 {
                    #[cfg(target_os = "none")]
                    {
                        // SAFETY: Taking the address of a linker symbol
                        // never reads through it.
                        unsafe { core::ptr::addr_of!(symbols::$sym) as u64 }
                    }
                    #[cfg(not(target_os = "none"))]
                    {
                        $host
                    }
                }
            )*
        };
    }

    layout_addr! {
        /// First byte of the kernel image.
        kernel_start, __kernel_start, 0x4008_0000;
        /// End of the 2 MiB-mapped kernel region (includes the heap).
        kcode_end, __kcode_end, 0x4448_0000;
        /// Bottom of the allocator heap window.
        heap_bottom, __heap_bottom, 0x4040_0000;
        /// Top of the allocator heap window.
        heap_limit, __heap_limit, 0x4440_0000;
        /// Start of the EL0-readable shared region.
        shared_start, __shared_start, 0x4448_0000;
        /// End of the EL0-readable shared region.
        shared_end, __shared_end, 0x4448_1000;
        /// Start of the boot-screen task's code section.
        bootscreen_start, __bootscreen_start, 0;
        /// End of the boot-screen task's code section.
        bootscreen_end, __bootscreen_end, 0;
        /// End of the whole image, shared region included.
        kernel_image_end, __kernel_image_end, 0x4448_1000;
    }
}

/// The memory engine: both arenas plus the user-RAM page bump.
pub struct MemoryEngine {
    temp: TempArena,
    perm: PermanentArena,
    user_next: u64,
    user_end: u64,
    ram_base: u64,
    ram_size: u64,
}

impl MemoryEngine {
    /// Total RAM reported by the firmware.
    #[must_use]
    pub const fn ram_size(&self) -> u64 {
        self.ram_size
    }

    /// Base of RAM.
    #[must_use]
    pub const fn ram_base(&self) -> u64 {
        self.ram_base
    }
}

static MEMORY: Once<IrqSpinMutex<MemoryEngine>> = Once::new();

fn engine() -> &'static IrqSpinMutex<MemoryEngine> {
    MEMORY.get().expect("memory engine not initialised")
}

/// Discover RAM and wire up the arenas. Called once from `kmain`.
pub fn init() {
    // Boot can continue on the smallest configuration the board
    // supports; the user window just ends up tight.
    const RAM_FALLBACK: (u64, u64) = (0x4000_0000, 0x800_0000);

    // SAFETY: The firmware leaves the DTB at the platform address and the
    // kernel never writes over it.
    let (ram_base, ram_size) = match unsafe { dtb::parse() } {
        Ok(fdt) => {
            for slot in dtb::virtio_mmio_slots(&fdt) {
                log::debug!(
                    "dtb: virtio-mmio transport at {:#x} (+{:#x}), SPI {}",
                    slot.base,
                    slot.size,
                    slot.irq
                );
            }
            match dtb::memory_region(&fdt) {
                Ok(region) => region,
                Err(err) => {
                    log::warn!("dtb: {err:?}, assuming 128 MiB at the RAM base");
                    RAM_FALLBACK
                }
            }
        }
        Err(err) => {
            log::warn!("dtb: {err:?}, assuming 128 MiB at the RAM base");
            RAM_FALLBACK
        }
    };

    let heap_bottom = layout::heap_bottom();
    let heap_limit = layout::heap_limit();
    let temp_limit = heap_bottom + TEMP_ARENA_SIZE;

    // User pages start at the first 2 MiB boundary past the image.
    let user_next = (layout::kernel_image_end() + 1).next_multiple_of(0x20_0000);
    let user_end = (ram_base + ram_size) & !(0x20_0000 - 1);

    MEMORY.call_once(|| {
        IrqSpinMutex::new(MemoryEngine {
            temp: TempArena::new(heap_bottom, temp_limit),
            perm: PermanentArena::new(temp_limit, heap_limit),
            user_next,
            user_end,
            ram_base,
            ram_size,
        })
    });

    log::info!(
        "memory: {} MiB RAM at {ram_base:#x}, heap [{heap_bottom:#x}, {heap_limit:#x}), user [{user_next:#x}, {user_end:#x})",
        ram_size >> 20
    );
}

/// Allocate from the permanent arena. Exhaustion is fatal.
pub fn perm_alloc(size: u64) -> u64 {
    let result = engine().lock().perm.alloc(size);
    match result {
        Ok(addr) => addr,
        Err(err) => panic_with_info("permanent allocator overflow", err.pointer()),
    }
}

/// Allocate from the temporary arena. Exhaustion is fatal.
pub fn temp_alloc(size: u64) -> u64 {
    let result = engine().lock().temp.alloc(size);
    match result {
        Ok(addr) => addr,
        Err(err) => panic_with_info("temporary allocator overflow", err.pointer()),
    }
}

/// Return a block to the temporary arena's free list.
///
/// # Safety
///
/// `ptr` must come from [`temp_alloc`] with the same `size`, not yet
/// freed.
pub unsafe fn temp_free(ptr: u64, size: u64) {
    // SAFETY: Forwarded caller contract.
    unsafe { engine().lock().temp.free(ptr, size) };
}

/// Allocate `count` contiguous pages of user RAM. Exhaustion is fatal.
///
/// The pages are raw physical memory above the kernel image; the caller
/// maps them at the access level the task needs.
pub fn user_pages_alloc(count: u64) -> u64 {
    let mut engine = engine().lock();
    let size = count * PAGE_SIZE;
    if engine.user_next + size > engine.user_end {
        let pointer = engine.user_next;
        drop(engine);
        panic_with_info("user memory exhausted", pointer);
    }
    let result = engine.user_next;
    engine.user_next += size;
    result
}

/// Total RAM `(base, size)` as discovered at boot.
#[must_use]
pub fn ram_info() -> (u64, u64) {
    let engine = engine().lock();
    (engine.ram_base(), engine.ram_size())
}
