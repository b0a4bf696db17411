//! # Page Directory and Page Tables
//!
//! Both levels of the translation tree live inside the pool and use the same
//! 32-bit entry format:
//!
//! | Bits  | Field     | Meaning                                        |
//! |-------|-----------|------------------------------------------------|
//! | 0     | `present` | Entry is valid                                 |
//! | 1..32 | `frame`   | Inner table (directory) or data frame (table)  |
//!
//! An absent entry is all zeroes, so a freshly zeroed frame is an empty table.
//! Frame 0 has no special meaning at this level.
//!
//! - [`DirectoryEntry`] / [`PageDirectory`]: the outer level, indexed by
//!   [`OuterIndex`], spanning `directory_frames` frames from the root.
//! - [`TableEntry`] / [`PageTable`]: the inner level, indexed by
//!   [`InnerIndex`], exactly one frame.
//!
//! The views are thin handles onto the pool; they hold no entries themselves.
//! After changing a present leaf entry the caller must keep the TLB coherent.

use crate::pool::PhysicalPool;
use bitfield_struct::bitfield;
use vm_addresses::{AddressLayout, FrameNumber, InnerIndex, OuterIndex, PhysicalAddress};

/// Raw bit layout shared by directory and table entries.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryBits {
    /// Set if the entry refers to a frame.
    pub present: bool,
    /// The referenced frame number.
    #[bits(31)]
    pub frame: u32,
}

/// A page directory entry: absent, or the frame of an inner page table.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DirectoryEntry(EntryBits);

/// A page table entry: absent, or the frame backing one virtual page.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TableEntry(EntryBits);

impl DirectoryEntry {
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self(EntryBits::new())
    }

    /// Point at the inner page table stored in `frame`.
    #[inline]
    #[must_use]
    pub const fn to_table(frame: FrameNumber) -> Self {
        Self(
            EntryBits::new()
                .with_present(true)
                .with_frame(frame.as_u32()),
        )
    }

    /// The inner table's frame, if present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<FrameNumber> {
        if self.0.present() {
            Some(FrameNumber::new(self.0.frame()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(EntryBits::from_bits(raw))
    }

    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0.into_bits()
    }
}

impl TableEntry {
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self(EntryBits::new())
    }

    /// Map the page onto `frame`.
    #[inline]
    #[must_use]
    pub const fn to_frame(frame: FrameNumber) -> Self {
        Self(
            EntryBits::new()
                .with_present(true)
                .with_frame(frame.as_u32()),
        )
    }

    /// The backing frame, if present.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<FrameNumber> {
        if self.0.present() {
            Some(FrameNumber::new(self.0.frame()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(EntryBits::from_bits(raw))
    }

    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0.into_bits()
    }
}

/// The outer table, rooted at a frame of the pool.
pub struct PageDirectory<'p> {
    pool: &'p PhysicalPool,
    base: PhysicalAddress,
    entry_size: u32,
}

/// An inner table occupying one frame of the pool.
pub struct PageTable<'p> {
    pool: &'p PhysicalPool,
    base: PhysicalAddress,
    entry_size: u32,
}

#[inline]
fn entry_address(base: PhysicalAddress, entry_size: u32, index: u32) -> Option<PhysicalAddress> {
    index
        .checked_mul(entry_size)
        .and_then(|off| base.as_u32().checked_add(off))
        .map(PhysicalAddress::new)
}

impl<'p> PageDirectory<'p> {
    #[inline]
    #[must_use]
    pub const fn new(pool: &'p PhysicalPool, layout: &AddressLayout, root: FrameNumber) -> Self {
        Self {
            pool,
            base: layout.frame_base(root),
            entry_size: layout.entry_size(),
        }
    }

    /// Read entry `i`. Entries beyond the pool read as absent.
    #[inline]
    #[must_use]
    pub fn get(&self, i: OuterIndex) -> DirectoryEntry {
        entry_address(self.base, self.entry_size, i.as_u32())
            .and_then(|at| self.pool.load_entry(at))
            .map_or(DirectoryEntry::absent(), DirectoryEntry::from_raw)
    }

    /// Overwrite entry `i`; `None` if it lies beyond the pool.
    #[inline]
    #[must_use]
    pub fn set(&self, i: OuterIndex, e: DirectoryEntry) -> Option<()> {
        let at = entry_address(self.base, self.entry_size, i.as_u32())?;
        self.pool.store_entry(at, e.into_raw())
    }
}

impl<'p> PageTable<'p> {
    #[inline]
    #[must_use]
    pub const fn new(pool: &'p PhysicalPool, layout: &AddressLayout, frame: FrameNumber) -> Self {
        Self {
            pool,
            base: layout.frame_base(frame),
            entry_size: layout.entry_size(),
        }
    }

    /// Read entry `i`. Entries beyond the pool read as absent.
    #[inline]
    #[must_use]
    pub fn get(&self, i: InnerIndex) -> TableEntry {
        entry_address(self.base, self.entry_size, i.as_u32())
            .and_then(|at| self.pool.load_entry(at))
            .map_or(TableEntry::absent(), TableEntry::from_raw)
    }

    /// Overwrite entry `i`; `None` if it lies beyond the pool.
    #[inline]
    #[must_use]
    pub fn set(&self, i: InnerIndex, e: TableEntry) -> Option<()> {
        let at = entry_address(self.base, self.entry_size, i.as_u32())?;
        self.pool.store_entry(at, e.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> AddressLayout {
        AddressLayout::new(4096, 4).unwrap()
    }

    #[test]
    fn entry_bit_layout() {
        let e = TableEntry::to_frame(FrameNumber::new(0x1234));
        assert_eq!(e.into_raw(), (0x1234 << 1) | 1);
        assert_eq!(e.frame(), Some(FrameNumber::new(0x1234)));

        assert_eq!(TableEntry::absent().into_raw(), 0);
        assert_eq!(TableEntry::from_raw(0).frame(), None);
        // a frame number without the present bit is still absent
        assert_eq!(TableEntry::from_raw(0x1234 << 1).frame(), None);
    }

    #[test]
    fn frame_zero_is_a_valid_target() {
        let d = DirectoryEntry::to_table(FrameNumber::new(0));
        assert_eq!(d.next_table(), Some(FrameNumber::new(0)));
        assert_ne!(d, DirectoryEntry::absent());
    }

    #[test]
    fn views_read_and_write_the_pool() {
        let layout = layout();
        let pool = PhysicalPool::new(4, 4096);
        let dir = PageDirectory::new(&pool, &layout, FrameNumber::new(0));
        let table = PageTable::new(&pool, &layout, FrameNumber::new(2));

        assert_eq!(dir.get(OuterIndex::new(5)), DirectoryEntry::absent());
        dir.set(OuterIndex::new(5), DirectoryEntry::to_table(FrameNumber::new(2)))
            .unwrap();
        table
            .set(InnerIndex::new(1023), TableEntry::to_frame(FrameNumber::new(3)))
            .unwrap();

        assert_eq!(
            dir.get(OuterIndex::new(5)).next_table(),
            Some(FrameNumber::new(2))
        );
        assert_eq!(
            table.get(InnerIndex::new(1023)).frame(),
            Some(FrameNumber::new(3))
        );
        // entry 5 of the directory is word 5 of frame 0
        assert_eq!(pool.load_entry(PhysicalAddress::new(20)), Some((2 << 1) | 1));
        // last entry of frame 2
        assert_eq!(
            pool.load_entry(PhysicalAddress::new(3 * 4096 - 4)),
            Some((3 << 1) | 1)
        );
    }

    #[test]
    fn tables_beyond_the_pool_are_empty_and_read_only() {
        let layout = layout();
        let pool = PhysicalPool::new(2, 4096);
        let table = PageTable::new(&pool, &layout, FrameNumber::new(9));
        assert_eq!(table.get(InnerIndex::new(0)).frame(), None);
        assert_eq!(
            table.set(InnerIndex::new(0), TableEntry::to_frame(FrameNumber::new(1))),
            None
        );
    }
}
