//! # Physical Pool
//!
//! The simulated physical memory: `total_pages * page_size` bytes obtained
//! from the host in one zeroed allocation and never resized.
//!
//! The pool is stored as 32-bit atomic words. Directory and table entries
//! occupy exactly one word, so the translation path can read them while the
//! allocator is installing new ones. Byte accesses shift within the word;
//! byte `k` of a word is bits `8k..8k+8`, independent of host endianness.
//!
//! Every accessor is bounds-checked and returns `None` outside the pool.

use alloc::alloc::{Layout, alloc_zeroed, handle_alloc_error};
use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};
use vm_addresses::PhysicalAddress;

const WORD_BYTES: u32 = u32::BITS / 8;

pub struct PhysicalPool {
    words: Box<[AtomicU32]>,
}

impl PhysicalPool {
    /// Allocate `frames` zero-filled frames of `page_size` bytes each.
    ///
    /// # Panics
    /// If the host cannot describe an allocation this large. Host allocation
    /// failure itself goes through [`handle_alloc_error`].
    #[must_use]
    pub fn new(frames: u32, page_size: u32) -> Self {
        let words = (frames as usize).saturating_mul((page_size / WORD_BYTES) as usize);
        Self {
            words: zeroed_words(words),
        }
    }

    /// Pool length in bytes.
    #[inline]
    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.words.len() * WORD_BYTES as usize
    }

    #[inline]
    fn word(&self, pa: PhysicalAddress) -> Option<&AtomicU32> {
        self.words.get((pa.as_u32() / WORD_BYTES) as usize)
    }

    #[inline]
    const fn shift(pa: PhysicalAddress) -> u32 {
        (pa.as_u32() % WORD_BYTES) * 8
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_byte(&self, pa: PhysicalAddress) -> Option<u8> {
        let word = self.word(pa)?.load(Ordering::Relaxed);
        Some((word >> Self::shift(pa)) as u8)
    }

    /// Replace the byte at `pa`, leaving its neighbours in the same word intact.
    #[must_use]
    pub fn write_byte(&self, pa: PhysicalAddress, value: u8) -> Option<()> {
        let shift = Self::shift(pa);
        let mask = 0xFF_u32 << shift;
        let bits = u32::from(value) << shift;
        // The closure never returns `None`, so the update cannot fail.
        let _ = self
            .word(pa)?
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
                Some((w & !mask) | bits)
            });
        Some(())
    }

    /// Load the table entry stored at `pa`, which must be word aligned.
    #[must_use]
    pub fn load_entry(&self, pa: PhysicalAddress) -> Option<u32> {
        debug_assert_eq!(Self::shift(pa), 0, "unaligned entry at {pa}");
        Some(self.word(pa)?.load(Ordering::Acquire))
    }

    /// Publish a table entry at `pa`, which must be word aligned.
    ///
    /// Release ordering makes everything written before (a zeroed table,
    /// the data of a fresh page) visible to a reader that observes the entry.
    #[must_use]
    pub fn store_entry(&self, pa: PhysicalAddress, raw: u32) -> Option<()> {
        debug_assert_eq!(Self::shift(pa), 0, "unaligned entry at {pa}");
        self.word(pa)?.store(raw, Ordering::Release);
        Some(())
    }

    /// Zero `len` bytes starting at the word-aligned offset `base`.
    #[must_use]
    pub fn zero(&self, base: PhysicalAddress, len: u32) -> Option<()> {
        let first = (base.as_u32() / WORD_BYTES) as usize;
        let count = (len / WORD_BYTES) as usize;
        let words = self.words.get(first..first.checked_add(count)?)?;
        for word in words {
            word.store(0, Ordering::Relaxed);
        }
        Some(())
    }
}

fn zeroed_words(len: usize) -> Box<[AtomicU32]> {
    if len == 0 {
        return Box::new([]);
    }

    let Ok(layout) = Layout::array::<AtomicU32>(len) else {
        panic!("a pool of {len} words exceeds the host address space");
    };

    // SAFETY: `layout` has a non-zero size.
    let base = unsafe { alloc_zeroed(layout) };
    if base.is_null() {
        handle_alloc_error(layout);
    }

    // SAFETY: `base` came from the global allocator with the layout of a
    // `[AtomicU32]` of `len` elements, and all-zero bits are a valid `AtomicU32`.
    unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(base.cast::<AtomicU32>(), len)) }
}
