//! # craybond-paging
//!
//! Stage-1 translation table construction for a 48-bit VA space with a
//! 4 KiB granule.
//!
//! The crate is pure table manipulation: typed addresses, descriptor
//! encoding, typed per-level tables, and the two mapping entry points the
//! kernel uses (2 MiB blocks at L2, 4 KiB pages at L3). Register
//! programming, TLB maintenance and the choice of what to map live in the
//! kernel; nothing here touches a system register, which keeps the whole
//! crate runnable under a host test harness.
//!
//! The kernel runs identity-mapped, so a [`PA`] converts to a pointer by a
//! plain cast.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod address;
pub mod descriptors;
pub mod mapping;
pub mod tables;

pub use address::{PA, VA};
pub use descriptors::{AccessLevel, MemoryType};
pub use mapping::{MapError, TableAllocator, map_block_2m, map_page_4k, walk, Mapping};
pub use tables::{L0Table, L1Table, L2Table, L3Table, PgTable};

/// Page size (4 KiB granule).
pub const PAGE_SIZE: usize = 4096;

/// Block size mapped by one L2 entry.
pub const BLOCK_2M_SIZE: usize = 2 * 1024 * 1024;

/// Entries per translation table.
pub const ENTRIES_PER_TABLE: usize = 512;

const _: () = assert!(PAGE_SIZE * ENTRIES_PER_TABLE == BLOCK_2M_SIZE);
