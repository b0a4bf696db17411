//! # Address Layout
//!
//! Derives the outer / inner / offset field widths of a 32-bit virtual address
//! from the page size and the size of one page-table entry:
//!
//! - `offset_bits = log2(page_size)`
//! - `inner_bits  = log2(page_size / entry_size)`
//! - `outer_bits  = 32 - inner_bits - offset_bits`
//!
//! A page table therefore always fills exactly one page. The directory is
//! `2^outer_bits` entries long and may span several frames for small pages.

use crate::{FrameNumber, PageNumber, PhysicalAddress, VirtualAddress};

/// Width of a simulated virtual address.
pub const ADDRESS_BITS: u32 = 32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("page size {0} is not a power of two")]
    PageSizeNotPowerOfTwo(u32),
    #[error("entry size {0} is not a power of two")]
    EntrySizeNotPowerOfTwo(u32),
    #[error("entry size {entry_size} exceeds the page size {page_size}")]
    EntryLargerThanPage { entry_size: u32, page_size: u32 },
    #[error("{offset_bits} offset bits and {inner_bits} table bits leave no directory bits")]
    TooManyBits { offset_bits: u32, inner_bits: u32 },
}

/// Index into the page directory (the top `outer_bits` of a virtual address).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OuterIndex(u32);

/// Index into a page table (the `inner_bits` above the offset).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InnerIndex(u32);

/// Byte offset inside a page (the low `offset_bits`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset(u32);

macro_rules! index_accessors {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                #[inline]
                #[must_use]
                pub const fn new(value: u32) -> Self {
                    Self(value)
                }

                #[inline]
                #[must_use]
                pub const fn as_u32(self) -> u32 {
                    self.0
                }

                #[inline]
                #[must_use]
                pub const fn as_usize(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

index_accessors!(OuterIndex, InnerIndex, PageOffset);

/// Bit-field decomposition of a 32-bit virtual address.
///
/// Computed once when the address space is set up and immutable afterwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AddressLayout {
    page_size: u32,
    entry_size: u32,
    offset_bits: u32,
    inner_bits: u32,
    outer_bits: u32,
}

/// Mask with the low `bits` bits set; `bits` must be below 32.
#[inline(always)]
const fn low_mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

impl AddressLayout {
    /// Derive the layout for `page_size`-byte pages holding `entry_size`-byte entries.
    ///
    /// # Errors
    /// Both sizes must be powers of two, an entry must fit into a page, and at
    /// least one bit must remain for the directory index.
    pub const fn new(page_size: u32, entry_size: u32) -> Result<Self, LayoutError> {
        if !page_size.is_power_of_two() {
            return Err(LayoutError::PageSizeNotPowerOfTwo(page_size));
        }
        if !entry_size.is_power_of_two() {
            return Err(LayoutError::EntrySizeNotPowerOfTwo(entry_size));
        }
        if entry_size > page_size {
            return Err(LayoutError::EntryLargerThanPage {
                entry_size,
                page_size,
            });
        }

        let offset_bits = page_size.trailing_zeros();
        let inner_bits = (page_size / entry_size).trailing_zeros();
        if offset_bits + inner_bits >= ADDRESS_BITS {
            return Err(LayoutError::TooManyBits {
                offset_bits,
                inner_bits,
            });
        }

        Ok(Self {
            page_size,
            entry_size,
            offset_bits,
            inner_bits,
            outer_bits: ADDRESS_BITS - inner_bits - offset_bits,
        })
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    #[must_use]
    pub const fn entry_size(&self) -> u32 {
        self.entry_size
    }

    #[inline]
    #[must_use]
    pub const fn offset_bits(&self) -> u32 {
        self.offset_bits
    }

    #[inline]
    #[must_use]
    pub const fn inner_bits(&self) -> u32 {
        self.inner_bits
    }

    #[inline]
    #[must_use]
    pub const fn outer_bits(&self) -> u32 {
        self.outer_bits
    }

    /// Number of entries in the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_entries(&self) -> u32 {
        1 << self.outer_bits
    }

    /// Number of entries in one page table.
    #[inline]
    #[must_use]
    pub const fn table_entries(&self) -> u32 {
        1 << self.inner_bits
    }

    /// Number of whole frames the page directory occupies at the start of the pool.
    #[inline]
    #[must_use]
    pub const fn directory_frames(&self) -> u32 {
        let bytes = self.directory_entries() as u64 * self.entry_size as u64;
        #[allow(clippy::cast_possible_truncation)]
        let frames = bytes.div_ceil(self.page_size as u64) as u32;
        frames
    }

    #[inline]
    #[must_use]
    pub const fn outer_index(&self, va: VirtualAddress) -> OuterIndex {
        OuterIndex(va.as_u32() >> (ADDRESS_BITS - self.outer_bits))
    }

    #[inline]
    #[must_use]
    pub const fn inner_index(&self, va: VirtualAddress) -> InnerIndex {
        InnerIndex((va.as_u32() >> self.offset_bits) & low_mask(self.inner_bits))
    }

    #[inline]
    #[must_use]
    pub const fn offset(&self, va: VirtualAddress) -> PageOffset {
        PageOffset(va.as_u32() & low_mask(self.offset_bits))
    }

    /// Split `va` into (outer index, inner index, offset).
    #[inline]
    #[must_use]
    pub const fn split(&self, va: VirtualAddress) -> (OuterIndex, InnerIndex, PageOffset) {
        (self.outer_index(va), self.inner_index(va), self.offset(va))
    }

    /// Inverse of [`split`](Self::split). Excess bits in any field are masked off.
    #[inline]
    #[must_use]
    pub const fn compose(
        &self,
        outer: OuterIndex,
        inner: InnerIndex,
        offset: PageOffset,
    ) -> VirtualAddress {
        let outer = (outer.0 & low_mask(self.outer_bits)) << (ADDRESS_BITS - self.outer_bits);
        let inner = (inner.0 & low_mask(self.inner_bits)) << self.offset_bits;
        let offset = offset.0 & low_mask(self.offset_bits);
        VirtualAddress::new(outer | inner | offset)
    }

    /// The virtual page (slot, TLB tag) containing `va`.
    ///
    /// Equal to `outer_index << inner_bits | inner_index`.
    #[inline]
    #[must_use]
    pub const fn page_number(&self, va: VirtualAddress) -> PageNumber {
        PageNumber::new(va.as_u32() >> self.offset_bits)
    }

    /// Base address of virtual page `page`, or `None` if it lies beyond 32 bits.
    #[inline]
    #[must_use]
    pub const fn page_address(&self, page: PageNumber) -> Option<VirtualAddress> {
        if page.as_u32() > (u32::MAX >> self.offset_bits) {
            return None;
        }
        Some(VirtualAddress::new(page.as_u32() << self.offset_bits))
    }

    /// Pool offset of the first byte of `frame`.
    #[inline]
    #[must_use]
    pub const fn frame_base(&self, frame: FrameNumber) -> PhysicalAddress {
        PhysicalAddress::new(frame.as_u32() << self.offset_bits)
    }

    /// The frame containing pool offset `pa`.
    #[inline]
    #[must_use]
    pub const fn frame_of(&self, pa: PhysicalAddress) -> FrameNumber {
        FrameNumber::new(pa.as_u32() >> self.offset_bits)
    }

    /// Pool offset of byte `offset` inside `frame`.
    #[inline]
    #[must_use]
    pub const fn join(&self, frame: FrameNumber, offset: PageOffset) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_base(frame).as_u32() | offset.0)
    }

    /// Number of pages needed to hold `bytes` bytes (rounded up).
    #[inline]
    #[must_use]
    pub const fn pages_for(&self, bytes: u32) -> u32 {
        bytes.div_ceil(self.page_size)
    }
}
