//! MMU bring-up and runtime mapping.
//!
//! Builds the translation table tree from the statically allocated root,
//! installs the initial map set, programs MAIR/TCR/TTBR0 and turns
//! translation on. Mappings installed later (user task memory) go through
//! the same entry points followed by the required TLB and cache
//! maintenance.
//!
//! Initial map set:
//! - kernel image and heap `[__kernel_start, __kcode_end)`: 2 MiB normal
//!   blocks, kernel-private,
//! - UART, GIC (`0x12000` from the distributor base), fw-cfg and any GPU
//!   windows recorded during the probe: 4 KiB device pages,
//! - shared region `[__shared_start, __shared_end)`: 4 KiB normal pages,
//!   readable from EL0.

use core::cell::UnsafeCell;

use craybond_arch::cpu::{dsb_ish, icache_invalidate_all, isb, tlb_invalidate_all};
use craybond_arch::registers::{read_sctlr_el1, write_mair_el1, write_sctlr_el1, write_tcr_el1, write_ttbr0_el1};
use craybond_paging::{
    AccessLevel, BLOCK_2M_SIZE, L0Table, MapError, MemoryType, PA, PAGE_SIZE, PgTable,
    TableAllocator, VA, map_block_2m, map_page_4k,
};
use craybond_pal::board;

use super::{layout, perm_alloc};
use crate::gpu;

/// MAIR: index 0 device-nGnRnE (0x00), index 1 normal non-cacheable (0x44).
const MAIR_VALUE: u64 = 0x44 << 8;

/// TCR: 48-bit VA in both halves (T0SZ = T1SZ = 16), 4 KiB granule
/// (TG0 = 0b00, TG1 = 0b10), inner-shareable walks (SH0 = SH1 = 0b11).
const TCR_VALUE: u64 =
    16 | (0b11 << 12) | (0b00 << 14) | (16 << 16) | (0b11 << 28) | (0b10 << 30);

/// SCTLR_EL1.M.
const SCTLR_MMU_ENABLE: u64 = 1;

/// The statically allocated root (level-0) table, page-aligned.
#[repr(C, align(4096))]
struct RootTable(UnsafeCell<[u64; 512]>);

// SAFETY: Mutated only through the mapping entry points, single core.
unsafe impl Sync for RootTable {}

static ROOT_TABLE: RootTable = RootTable(UnsafeCell::new([0; 512]));

fn root() -> L0Table {
    // SAFETY: The static is page-aligned and lives forever.
    unsafe { L0Table::from_pa(PA::from_ptr(ROOT_TABLE.0.get())) }
}

/// Table allocator backed by the permanent arena.
struct PermTableAllocator;

impl TableAllocator for PermTableAllocator {
    fn allocate_table(&mut self) -> Option<PA> {
        // Arena exhaustion is fatal inside perm_alloc, so this always
        // returns a page.
        Some(PA::new(perm_alloc(PAGE_SIZE as u64)))
    }
}

/// Install a 2 MiB identity block, warning on conflicts.
fn map_block_identity(addr: u64, mem: MemoryType, level: AccessLevel) {
    match map_block_2m(root(), VA::new(addr), PA::new(addr), mem, level, &mut PermTableAllocator) {
        Ok(()) => {}
        Err(MapError::AlreadyMapped) => {
            log::warn!("mmu: {addr:#x} already mapped, keeping the present mapping");
        }
        Err(err) => log::warn!("mmu: block map at {addr:#x} failed: {err}"),
    }
}

/// Install a 4 KiB identity page, warning on conflicts.
///
/// A present mapping (including a covering 2 MiB block) is kept and the
/// conflict is logged.
pub fn map_page_identity(addr: u64, mem: MemoryType, level: AccessLevel) {
    match map_page_4k(root(), VA::new(addr), PA::new(addr), mem, level, &mut PermTableAllocator) {
        Ok(()) => {}
        Err(MapError::AlreadyMapped) => {
            log::warn!("mmu: {addr:#x} already mapped, keeping the present mapping");
        }
        Err(err) => log::warn!("mmu: page map at {addr:#x} failed: {err}"),
    }
}

/// Identity-map a device window with 4 KiB pages.
fn map_device_window(base: usize, size: usize) {
    let start = base & !(PAGE_SIZE - 1);
    let end = (base + size).next_multiple_of(PAGE_SIZE);
    let mut addr = start;
    while addr < end {
        map_page_identity(addr as u64, MemoryType::Device, AccessLevel::El1);
        addr += PAGE_SIZE;
    }
}

/// Build the initial map set and enable translation.
pub fn init() {
    // Kernel image and heap as 2 MiB kernel-private blocks.
    let start = layout::kernel_start() & !(BLOCK_2M_SIZE as u64 - 1);
    let end = layout::kcode_end();
    let mut addr = start;
    while addr < end {
        map_block_identity(addr, MemoryType::Normal, AccessLevel::El1);
        addr += BLOCK_2M_SIZE as u64;
    }

    // Device windows.
    map_device_window(board::UART0_BASE, board::UART0_SIZE);
    map_device_window(board::GICD_BASE, 0x12000);
    map_device_window(board::FW_CFG_BASE, board::FW_CFG_SIZE);
    for window in gpu::mmio_windows().into_iter().flatten() {
        map_device_window(window.base(), window.size());
    }

    // Shared region, readable from EL0.
    let mut addr = layout::shared_start();
    while addr < layout::shared_end() {
        map_page_identity(addr, MemoryType::Normal, AccessLevel::Shared);
        addr += PAGE_SIZE as u64;
    }

    enable();
    log::info!("mmu: stage-1 translation enabled");
}

/// Program the translation registers and set SCTLR_EL1.M.
fn enable() {
    write_mair_el1(MAIR_VALUE);
    write_tcr_el1(TCR_VALUE);

    dsb_ish();
    isb();

    write_ttbr0_el1(root().to_pa().value());

    write_sctlr_el1(read_sctlr_el1() | SCTLR_MMU_ENABLE);
    isb();
}

/// Maintenance required after changing live translation tables.
///
/// DSB, TLB invalidate (EL1, inner shareable), DSB, ISB; code pages
/// additionally get an instruction-cache invalidate.
pub fn maintain_after_update(code_pages: bool) {
    tlb_invalidate_all();
    if code_pages {
        icache_invalidate_all();
    }
}

/// Map freshly allocated task pages at the given access level.
///
/// Used by the spawn paths after the MMU is live; ends with the required
/// maintenance sequence.
pub fn map_task_pages(base: u64, pages: u64, level: AccessLevel, executable: bool) {
    for i in 0..pages {
        map_page_identity(base + i * PAGE_SIZE as u64, MemoryType::Normal, level);
    }
    maintain_after_update(executable);
}
