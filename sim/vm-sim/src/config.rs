//! # Simulator Configuration
//!
//! Compile-time defaults and the [`VmConfig`] a [`VirtualMemory`](crate::VirtualMemory)
//! is built from. Nothing here can be changed once the address space exists.

use crate::error::VmError;
use vm_addresses::AddressLayout;

/// Default page size (4 KiB).
pub const PAGE_SIZE: u32 = 4096;

/// Largest pool the 32-bit address space can describe (4 GiB - 1).
pub const MAX_MEMSIZE: u64 = 4 * 1024 * 1024 * 1024 - 1;

/// Default size of the simulated physical memory (1 GiB).
pub const MEMSIZE: u64 = 1024 * 1024 * 1024;

/// Default number of TLB rows.
pub const TLB_ENTRIES: u32 = 512;

/// Size of one directory or page-table entry in the pool.
#[allow(clippy::cast_possible_truncation)]
pub const ENTRY_SIZE: u32 = size_of::<u32>() as u32;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(MEMSIZE <= MAX_MEMSIZE);
    assert!(TLB_ENTRIES > 0);
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VmConfig {
    /// Bytes per page and per frame; a power of two.
    pub page_size: u32,
    /// Requested pool size; capped at [`MAX_MEMSIZE`].
    pub pool_size: u64,
    /// Number of direct-mapped TLB rows.
    pub tlb_entries: u32,
}

impl VmConfig {
    pub const DEFAULT: Self = Self {
        page_size: PAGE_SIZE,
        pool_size: MEMSIZE,
        tlb_entries: TLB_ENTRIES,
    };

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: u64) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub const fn with_tlb_entries(mut self, tlb_entries: u32) -> Self {
        self.tlb_entries = tlb_entries;
        self
    }

    /// `min(pool_size, MAX_MEMSIZE)`.
    #[must_use]
    pub const fn effective_pool_size(&self) -> u64 {
        if self.pool_size < MAX_MEMSIZE {
            self.pool_size
        } else {
            MAX_MEMSIZE
        }
    }

    /// Number of whole pages in the pool; also the length of both bitmaps.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn total_pages(&self) -> u32 {
        // The pool is capped below 4 GiB, so the quotient always fits.
        (self.effective_pool_size() / self.page_size as u64) as u32
    }

    /// Check the configuration and derive its address layout.
    ///
    /// # Errors
    /// - [`VmError::Layout`] for an unusable page size.
    /// - [`VmError::InvalidConfig`] if the TLB has no rows, or the pool cannot
    ///   hold the page directory plus at least one more frame.
    pub fn validate(&self) -> Result<AddressLayout, VmError> {
        let layout = AddressLayout::new(self.page_size, ENTRY_SIZE)?;
        if self.tlb_entries == 0 {
            return Err(VmError::InvalidConfig("the TLB needs at least one row"));
        }
        if self.total_pages() <= layout.directory_frames() {
            return Err(VmError::InvalidConfig(
                "the pool is too small to hold the page directory",
            ));
        }
        Ok(layout)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
