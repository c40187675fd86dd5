//! Translation table descriptor encoding.
//!
//! Descriptor format (stage 1, 4 KiB granule):
//!
//! ```text
//! +-----+-----+----------------------+----+----+------+----+--------+------+
//! | UXN | PXN | Output addr [47:12]  | AF | SH | AP   | NS | ATTRIDX| type |
//! +-----+-----+----------------------+----+----+------+----+--------+------+
//!   54    53   47                 12   10   9:8  7:6    5    4:2      1:0
//! ```
//!
//! `type` bits[1:0]: `11` table pointer (L0-L2) or page (L3), `01` block
//! (L2), `0x` invalid when bit 0 is clear.

use crate::PA;

/// Output-address field for tables and 4 KiB pages, bits [47:12].
pub const OUTPUT_MASK_4K: u64 = 0x0000_FFFF_FFFF_F000;

/// Output-address field for 2 MiB blocks, bits [47:21].
pub const OUTPUT_MASK_2M: u64 = 0x0000_FFFF_FFE0_0000;

/// Valid bit.
pub const DESC_VALID: u64 = 1 << 0;

/// bits[1:0] of a table pointer (and of an L3 page).
pub const DESC_TABLE: u64 = 0b11;

/// bits[1:0] of an L2 block.
pub const DESC_BLOCK: u64 = 0b01;

/// Access flag. Mandatory; this kernel does no access-flag faulting.
pub const DESC_AF: u64 = 1 << 10;

const SH_SHIFT: u64 = 8;
const SH_INNER: u64 = 0b11;
const AP_SHIFT: u64 = 6;
const ATTR_IDX_SHIFT: u64 = 2;
const PXN_BIT: u64 = 1 << 53;
const UXN_BIT: u64 = 1 << 54;

/// MAIR attribute index for device-nGnRnE memory.
pub const ATTR_IDX_DEVICE: u64 = 0;

/// MAIR attribute index for normal non-cacheable memory.
pub const ATTR_IDX_NORMAL: u64 = 1;

/// Memory type of a mapping, selecting the MAIR attribute index and
/// shareability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemoryType {
    /// Normal memory: attribute index 1, inner shareable.
    #[default]
    Normal,
    /// Device memory (nGnRnE): attribute index 0, no shareability field.
    Device,
}

/// Access-permission policy of a mapping.
///
/// The kernel uses exactly three policies:
///
/// | level    | AP   | UXN | PXN | effect                         |
/// |----------|------|-----|-----|--------------------------------|
/// | `El0`    | 0b01 | 0   | 0   | EL0/EL1 read-write             |
/// | `El1`    | 0b00 | 1   | 0   | EL1 read-write, EL0 no access  |
/// | `Shared` | 0b10 | 1   | 0   | read-only data shared with EL0 |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    /// User-accessible read-write (task code, data and stacks).
    El0,
    /// Kernel-private read-write.
    El1,
    /// Read-only shared region.
    Shared,
}

impl AccessLevel {
    /// AP field value, bits [7:6].
    #[must_use]
    pub const fn ap_bits(self) -> u64 {
        match self {
            Self::El0 => 0b01,
            Self::El1 => 0b00,
            Self::Shared => 0b10,
        }
    }

    /// UXN bit value.
    #[must_use]
    pub const fn uxn(self) -> bool {
        match self {
            Self::El0 => false,
            Self::El1 | Self::Shared => true,
        }
    }

    /// PXN bit value. Always clear: the kernel executes its own image and
    /// freshly relocated task code through these mappings.
    #[must_use]
    pub const fn pxn(self) -> bool {
        false
    }
}

/// Attribute bits shared by block and page descriptors.
#[must_use]
const fn leaf_attrs(mem: MemoryType, level: AccessLevel) -> u64 {
    let mut attrs = DESC_AF | (level.ap_bits() << AP_SHIFT);
    attrs |= match mem {
        MemoryType::Normal => (ATTR_IDX_NORMAL << ATTR_IDX_SHIFT) | (SH_INNER << SH_SHIFT),
        MemoryType::Device => ATTR_IDX_DEVICE << ATTR_IDX_SHIFT,
    };
    if level.uxn() {
        attrs |= UXN_BIT;
    }
    if level.pxn() {
        attrs |= PXN_BIT;
    }
    attrs
}

/// A raw 64-bit translation table entry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub u64);

impl Descriptor {
    /// The invalid entry.
    pub const INVALID: Self = Self(0);

    /// A table pointer to the next-level table at `table`.
    #[must_use]
    pub fn table(table: PA) -> Self {
        debug_assert!(table.is_page_aligned());
        Self((table.value() & OUTPUT_MASK_4K) | DESC_TABLE)
    }

    /// A 2 MiB block mapping of `pa` (valid at L2 only).
    #[must_use]
    pub fn block_2m(pa: PA, mem: MemoryType, level: AccessLevel) -> Self {
        debug_assert!(pa.value() & !OUTPUT_MASK_2M & OUTPUT_MASK_4K == 0);
        Self((pa.value() & OUTPUT_MASK_2M) | leaf_attrs(mem, level) | DESC_BLOCK)
    }

    /// A 4 KiB page mapping of `pa` (valid at L3 only).
    #[must_use]
    pub fn page_4k(pa: PA, mem: MemoryType, level: AccessLevel) -> Self {
        debug_assert!(pa.is_page_aligned());
        Self((pa.value() & OUTPUT_MASK_4K) | leaf_attrs(mem, level) | DESC_TABLE)
    }

    /// Bit 0 set.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 & DESC_VALID != 0
    }

    /// bits[1:0] == 11: a table pointer at L0-L2, a page at L3.
    #[inline]
    #[must_use]
    pub const fn is_table_or_page(self) -> bool {
        self.0 & 0b11 == DESC_TABLE
    }

    /// bits[1:0] == 01: a block at L1/L2.
    #[inline]
    #[must_use]
    pub const fn is_block(self) -> bool {
        self.0 & 0b11 == DESC_BLOCK
    }

    /// Next-level table address, if this is a table pointer.
    #[must_use]
    pub const fn table_address(self) -> Option<PA> {
        if self.is_table_or_page() {
            Some(PA::new(self.0 & OUTPUT_MASK_4K))
        } else {
            None
        }
    }

    /// Output address of a 4 KiB page entry.
    #[must_use]
    pub const fn page_address(self) -> PA {
        PA::new(self.0 & OUTPUT_MASK_4K)
    }

    /// Output address of a 2 MiB block entry.
    #[must_use]
    pub const fn block_address(self) -> PA {
        PA::new(self.0 & OUTPUT_MASK_2M)
    }

    /// AP field, bits [7:6].
    #[inline]
    #[must_use]
    pub const fn ap_bits(self) -> u64 {
        (self.0 >> AP_SHIFT) & 0b11
    }

    /// UXN bit.
    #[inline]
    #[must_use]
    pub const fn uxn(self) -> bool {
        self.0 & UXN_BIT != 0
    }

    /// PXN bit.
    #[inline]
    #[must_use]
    pub const fn pxn(self) -> bool {
        self.0 & PXN_BIT != 0
    }

    /// MAIR attribute index, bits [4:2].
    #[inline]
    #[must_use]
    pub const fn attr_index(self) -> u64 {
        (self.0 >> ATTR_IDX_SHIFT) & 0b111
    }
}

impl core::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.is_valid() {
            write!(f, "Descriptor::Invalid")
        } else if self.is_block() {
            write!(f, "Descriptor::Block({:#x})", self.0 & OUTPUT_MASK_2M)
        } else {
            write!(f, "Descriptor::TableOrPage({:#x})", self.0 & OUTPUT_MASK_4K)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_encoding_has_block_type_and_af() {
        let d = Descriptor::block_2m(PA::new(0x4000_0000), MemoryType::Normal, AccessLevel::El1);
        assert!(d.is_valid());
        assert!(d.is_block());
        assert_eq!(d.0 & 0b11, DESC_BLOCK);
        assert!(d.0 & DESC_AF != 0);
        assert_eq!(d.block_address().value(), 0x4000_0000);
        assert_eq!(d.attr_index(), ATTR_IDX_NORMAL);
    }

    #[test]
    fn page_encoding_has_page_type() {
        let d = Descriptor::page_4k(PA::new(0x900_1000), MemoryType::Device, AccessLevel::El1);
        assert!(d.is_valid());
        assert!(d.is_table_or_page());
        assert_eq!(d.page_address().value(), 0x900_1000);
        assert_eq!(d.attr_index(), ATTR_IDX_DEVICE);
    }

    #[test]
    fn access_level_policy_table() {
        // El0: AP=01, UXN=0, PXN=0
        let d = Descriptor::page_4k(PA::new(0x1000), MemoryType::Normal, AccessLevel::El0);
        assert_eq!(d.ap_bits(), 0b01);
        assert!(!d.uxn());
        assert!(!d.pxn());

        // El1: AP=00, UXN=1, PXN=0
        let d = Descriptor::page_4k(PA::new(0x1000), MemoryType::Normal, AccessLevel::El1);
        assert_eq!(d.ap_bits(), 0b00);
        assert!(d.uxn());
        assert!(!d.pxn());

        // Shared: AP=10
        let d = Descriptor::page_4k(PA::new(0x1000), MemoryType::Normal, AccessLevel::Shared);
        assert_eq!(d.ap_bits(), 0b10);
    }

    #[test]
    fn table_pointer_round_trips_address() {
        let d = Descriptor::table(PA::new(0x8_0000));
        assert_eq!(d.table_address().unwrap().value(), 0x8_0000);
        assert!(Descriptor::INVALID.table_address().is_none());
        let b = Descriptor::block_2m(PA::new(0x20_0000), MemoryType::Normal, AccessLevel::El1);
        assert!(b.table_address().is_none());
    }
}
