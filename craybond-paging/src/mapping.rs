//! Mapping installation and the software table walk.
//!
//! Two entry points mirror the kernel's two mapping sizes: 2 MiB blocks at
//! L2 for the kernel image and RAM, 4 KiB pages at L3 for device windows,
//! the shared region and user task memory. Missing intermediate tables are
//! allocated through [`TableAllocator`], zeroed and linked.
//!
//! A virtual address has at most one mapping. Installing over a present
//! incompatible entry fails with [`MapError::AlreadyMapped`] and leaves the
//! table state untouched; the caller decides whether that is a warning or a
//! fault.

use crate::address::{PA, VA};
use crate::descriptors::{AccessLevel, Descriptor, MemoryType};
use crate::tables::{L0Table, L1Table, L2Table, L3Table, PgTable, zero_table};

/// Allocator for intermediate translation tables.
///
/// Implementations return one page of memory per call; the mapping code
/// zeroes it before linking.
pub trait TableAllocator {
    /// Allocate one page for a translation table, or `None` when the
    /// backing arena is exhausted.
    fn allocate_table(&mut self) -> Option<PA>;
}

/// Errors from the mapping entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "mapping conflicts must at least be logged"]
pub enum MapError {
    /// Address not aligned to the requested mapping size.
    NotAligned,
    /// A present entry already covers the virtual address.
    AlreadyMapped,
    /// The table allocator was exhausted.
    AllocationFailed,
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAligned => write!(f, "address not aligned for the mapping size"),
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::AllocationFailed => write!(f, "translation table allocation failed"),
        }
    }
}

/// Get the next-level table behind `desc`, or create one.
///
/// `set` installs the new table pointer into the parent entry.
fn get_or_create<T, A, F>(desc: Descriptor, alloc: &mut A, set: F) -> Result<T, MapError>
where
    T: PgTable,
    A: TableAllocator,
    F: FnOnce(Descriptor),
{
    if let Some(pa) = desc.table_address() {
        // SAFETY: A table-pointer entry references a live table.
        return Ok(unsafe { T::from_pa(pa) });
    }
    if desc.is_valid() {
        // A block where a table is needed.
        return Err(MapError::AlreadyMapped);
    }

    let pa = alloc.allocate_table().ok_or(MapError::AllocationFailed)?;
    // SAFETY: Fresh page from the allocator, not yet linked anywhere.
    unsafe { zero_table(pa) };
    set(Descriptor::table(pa));
    // SAFETY: The page now holds 512 invalid entries.
    Ok(unsafe { T::from_pa(pa) })
}

/// Install a 2 MiB block mapping of `pa` at `va`.
///
/// Both addresses must be 2 MiB-aligned. Fails with `AlreadyMapped` if the
/// L2 slot is occupied (by a block or by a table of 4 KiB pages); the
/// present mapping is kept.
pub fn map_block_2m<A: TableAllocator>(
    l0: L0Table,
    va: VA,
    pa: PA,
    mem: MemoryType,
    level: AccessLevel,
    alloc: &mut A,
) -> Result<(), MapError> {
    if !va.is_block_aligned() || !pa.is_block_aligned() {
        return Err(MapError::NotAligned);
    }

    let l1: L1Table = get_or_create(l0.get(va), alloc, |d| unsafe { l0.set(va, d) })?;
    let l2: L2Table = get_or_create(l1.get(va), alloc, |d| unsafe { l1.set(va, d) })?;

    if l2.get(va).is_valid() {
        return Err(MapError::AlreadyMapped);
    }
    // SAFETY: Slot verified invalid; caller owns TLB maintenance.
    unsafe { l2.set(va, Descriptor::block_2m(pa, mem, level)) };
    Ok(())
}

/// Install a 4 KiB page mapping of `pa` at `va` with the given access
/// policy.
///
/// Both addresses must be page-aligned. Fails with `AlreadyMapped` when
/// the address is covered by an existing 2 MiB block or a present page;
/// the present mapping is kept either way.
pub fn map_page_4k<A: TableAllocator>(
    l0: L0Table,
    va: VA,
    pa: PA,
    mem: MemoryType,
    level: AccessLevel,
    alloc: &mut A,
) -> Result<(), MapError> {
    if !va.is_page_aligned() || !pa.is_page_aligned() {
        return Err(MapError::NotAligned);
    }

    let l1: L1Table = get_or_create(l0.get(va), alloc, |d| unsafe { l0.set(va, d) })?;
    let l2: L2Table = get_or_create(l1.get(va), alloc, |d| unsafe { l1.set(va, d) })?;
    let l3: L3Table = get_or_create(l2.get(va), alloc, |d| unsafe { l2.set(va, d) })?;

    if l3.get(va).is_valid() {
        return Err(MapError::AlreadyMapped);
    }
    // SAFETY: Slot verified invalid; caller owns TLB maintenance.
    unsafe { l3.set(va, Descriptor::page_4k(pa, mem, level)) };
    Ok(())
}

/// Result of a software table walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapping {
    /// `va` resolved through a 2 MiB block entry.
    Block2M {
        /// Output address of the containing block.
        pa: PA,
        /// The raw L2 entry.
        desc: Descriptor,
    },
    /// `va` resolved through a 4 KiB page entry.
    Page4K {
        /// Output address of the page.
        pa: PA,
        /// The raw L3 entry.
        desc: Descriptor,
    },
}

impl Mapping {
    /// The raw leaf descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> Descriptor {
        match self {
            Self::Block2M { desc, .. } | Self::Page4K { desc, .. } => *desc,
        }
    }

    /// Physical address `va` translates to, including the page/block
    /// offset the walk carried through.
    #[must_use]
    pub const fn output(&self) -> PA {
        match self {
            Self::Block2M { pa, .. } | Self::Page4K { pa, .. } => *pa,
        }
    }
}

/// Walk the tables for `va` in software, as the MMU would.
///
/// Returns `None` when any level misses.
#[must_use]
pub fn walk(l0: L0Table, va: VA) -> Option<Mapping> {
    let l1_pa = l0.get(va).table_address()?;
    // SAFETY: Table pointers reference live tables.
    let l1 = unsafe { L1Table::from_pa(l1_pa) };

    let l2_pa = l1.get(va).table_address()?;
    // SAFETY: As above.
    let l2 = unsafe { L2Table::from_pa(l2_pa) };

    let l2_desc = l2.get(va);
    if l2_desc.is_block() {
        let offset = va.value() & (crate::BLOCK_2M_SIZE as u64 - 1);
        return Some(Mapping::Block2M {
            pa: l2_desc.block_address().offset(offset),
            desc: l2_desc,
        });
    }

    let l3_pa = l2_desc.table_address()?;
    // SAFETY: As above.
    let l3 = unsafe { L3Table::from_pa(l3_pa) };

    let l3_desc = l3.get(va);
    if !l3_desc.is_valid() {
        return None;
    }
    let offset = va.value() & (crate::PAGE_SIZE as u64 - 1);
    Some(Mapping::Page4K {
        pa: l3_desc.page_address().offset(offset),
        desc: l3_desc,
    })
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::boxed::Box;
    use std::vec::Vec;

    use super::*;
    use crate::descriptors::{ATTR_IDX_DEVICE, ATTR_IDX_NORMAL, DESC_BLOCK};

    /// Test allocator handing out leaked page-aligned boxes.
    struct HostAlloc {
        handed_out: Vec<u64>,
        budget: usize,
    }

    #[repr(align(4096))]
    struct Page([u8; 4096]);

    impl HostAlloc {
        fn new() -> Self {
            Self {
                handed_out: Vec::new(),
                budget: usize::MAX,
            }
        }

        fn with_budget(budget: usize) -> Self {
            Self {
                handed_out: Vec::new(),
                budget,
            }
        }
    }

    impl TableAllocator for HostAlloc {
        fn allocate_table(&mut self) -> Option<PA> {
            if self.handed_out.len() >= self.budget {
                return None;
            }
            let page = Box::leak(Box::new(Page([0xAA; 4096])));
            let pa = PA::from_ptr(page as *const Page);
            self.handed_out.push(pa.value());
            Some(pa)
        }
    }

    fn fresh_root(alloc: &mut HostAlloc) -> L0Table {
        let pa = alloc.allocate_table().unwrap();
        unsafe { zero_table(pa) };
        unsafe { L0Table::from_pa(pa) }
    }

    #[test]
    fn page_walk_reaches_the_output_address() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let va = VA::new(0x4004_5000);
        let pa = PA::new(0x8009_2000);

        map_page_4k(l0, va, pa, MemoryType::Normal, AccessLevel::El0, &mut alloc).unwrap();

        let m = walk(l0, va).expect("mapped address must walk");
        match m {
            Mapping::Page4K { pa: out, desc } => {
                assert_eq!(out.value(), pa.value());
                assert_eq!(desc.ap_bits(), 0b01);
                assert!(!desc.uxn());
                assert!(!desc.pxn());
            }
            other => panic!("expected a page mapping, got {other:?}"),
        }

        // Offsets carry through the walk.
        let m = walk(l0, VA::new(0x4004_5123)).unwrap();
        assert_eq!(m.output().value(), 0x8009_2123);
    }

    #[test]
    fn walk_honours_the_access_policy_per_level() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);

        for (level, ap, uxn) in [
            (AccessLevel::El0, 0b01, false),
            (AccessLevel::El1, 0b00, true),
            (AccessLevel::Shared, 0b10, true),
        ] {
            let va = VA::new(0x10_0000_0000 + (ap << 16));
            map_page_4k(l0, va, PA::new(0x5000), MemoryType::Normal, level, &mut alloc).unwrap();
            let desc = walk(l0, va).unwrap().descriptor();
            assert_eq!(desc.ap_bits(), ap);
            assert_eq!(desc.uxn(), uxn);
            assert!(!desc.pxn());
        }
    }

    #[test]
    fn block_mapping_yields_a_block_entry() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let va = VA::new(0x4000_0000);

        map_block_2m(
            l0,
            va,
            PA::new(0x4000_0000),
            MemoryType::Normal,
            AccessLevel::El1,
            &mut alloc,
        )
        .unwrap();

        let m = walk(l0, va).unwrap();
        let desc = m.descriptor();
        assert_eq!(desc.0 & 0b11, DESC_BLOCK);
        assert_eq!(desc.attr_index(), ATTR_IDX_NORMAL);
        // Any VA inside the block resolves through it.
        assert_eq!(
            walk(l0, VA::new(0x4000_1000)).unwrap().output().value(),
            0x4000_1000
        );
    }

    #[test]
    fn device_pages_use_attr_index_zero() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let va = VA::new(0x900_0000);

        map_page_4k(l0, va, PA::new(0x900_0000), MemoryType::Device, AccessLevel::El1, &mut alloc)
            .unwrap();
        assert_eq!(walk(l0, va).unwrap().descriptor().attr_index(), ATTR_IDX_DEVICE);
    }

    #[test]
    fn page_over_block_is_rejected_and_block_survives() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let block_va = VA::new(0x4000_0000);

        map_block_2m(
            l0,
            block_va,
            PA::new(0x4000_0000),
            MemoryType::Normal,
            AccessLevel::El1,
            &mut alloc,
        )
        .unwrap();
        let before = walk(l0, block_va).unwrap().descriptor();

        let err = map_page_4k(
            l0,
            VA::new(0x4000_1000),
            PA::new(0x9999_9000),
            MemoryType::Normal,
            AccessLevel::El0,
            &mut alloc,
        )
        .unwrap_err();
        assert_eq!(err, MapError::AlreadyMapped);

        // The block entry is byte-identical and still resolves.
        assert_eq!(walk(l0, block_va).unwrap().descriptor(), before);
        assert_eq!(
            walk(l0, VA::new(0x4000_1000)).unwrap().output().value(),
            0x4000_1000
        );
    }

    #[test]
    fn remapping_a_present_page_is_rejected() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let va = VA::new(0x7000_0000);

        map_page_4k(l0, va, PA::new(0x1000), MemoryType::Normal, AccessLevel::El0, &mut alloc)
            .unwrap();
        let before = walk(l0, va).unwrap().descriptor();

        // Same parameters: table state unchanged, error reported.
        let err = map_page_4k(
            l0,
            va,
            PA::new(0x1000),
            MemoryType::Normal,
            AccessLevel::El0,
            &mut alloc,
        )
        .unwrap_err();
        assert_eq!(err, MapError::AlreadyMapped);
        assert_eq!(walk(l0, va).unwrap().descriptor(), before);
    }

    #[test]
    fn misaligned_requests_are_rejected() {
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);

        assert_eq!(
            map_block_2m(
                l0,
                VA::new(0x4000_1000),
                PA::new(0x4000_0000),
                MemoryType::Normal,
                AccessLevel::El1,
                &mut alloc,
            ),
            Err(MapError::NotAligned)
        );
        assert_eq!(
            map_page_4k(
                l0,
                VA::new(0x123),
                PA::new(0x1000),
                MemoryType::Normal,
                AccessLevel::El1,
                &mut alloc,
            ),
            Err(MapError::NotAligned)
        );
    }

    #[test]
    fn allocator_exhaustion_surfaces() {
        let mut alloc = HostAlloc::with_budget(1); // root only
        let l0 = fresh_root(&mut alloc);
        assert_eq!(
            map_page_4k(
                l0,
                VA::new(0x1000),
                PA::new(0x1000),
                MemoryType::Normal,
                AccessLevel::El1,
                &mut alloc,
            ),
            Err(MapError::AllocationFailed)
        );
    }

    #[test]
    fn intermediate_tables_are_zeroed_before_linking() {
        // HostAlloc poisons pages with 0xAA; a successful walk proves the
        // mapper zeroed them before use.
        let mut alloc = HostAlloc::new();
        let l0 = fresh_root(&mut alloc);
        let va = VA::new(0x123_4567_8000);
        map_page_4k(l0, va, PA::new(0x2000), MemoryType::Normal, AccessLevel::El1, &mut alloc)
            .unwrap();
        // A sibling VA sharing L1/L2/L3 tables but a different slot misses.
        assert!(walk(l0, VA::new(0x123_4567_9000)).is_none());
    }
}
