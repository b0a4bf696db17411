//! # Bitmap Page Allocator
//!
//! One bit per page: set means allocated. The address space keeps two
//! independent instances, one over virtual slots and one over physical
//! frames, both guarded by the structures lock.

use alloc::vec;
use alloc::vec::Vec;

const BITS: usize = u64::BITS as usize;

pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// A bitmap of `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS)],
            len,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    const fn locate(index: usize) -> (usize, u64) {
        (index / BITS, 1 << (index % BITS))
    }

    /// `true` if bit `index` is set. Bits past the end read as clear.
    #[inline]
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len, "bit {index} out of range");
        let (word, mask) = Self::locate(index);
        self.words[word] |= mask;
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.len, "bit {index} out of range");
        let (word, mask) = Self::locate(index);
        self.words[word] &= !mask;
    }

    /// First-fit search for `n` consecutive clear bits; returns the first index.
    ///
    /// A set bit abandons the current run and the count restarts after it.
    /// Fully allocated words are skipped, fully free words counted in one step.
    #[must_use]
    pub fn find_free_run(&self, n: usize) -> Option<usize> {
        if n == 0 || n > self.len {
            return None;
        }

        let mut start = 0;
        let mut run = 0;
        let mut i = 0;
        while i < self.len {
            if i % BITS == 0 && i + BITS <= self.len {
                match self.words[i / BITS] {
                    u64::MAX => {
                        run = 0;
                        i += BITS;
                        continue;
                    }
                    0 => {
                        if run == 0 {
                            start = i;
                        }
                        run += BITS;
                        if run >= n {
                            return Some(start);
                        }
                        i += BITS;
                        continue;
                    }
                    _ => {}
                }
            }

            if self.test(i) {
                run = 0;
            } else {
                if run == 0 {
                    start = i;
                }
                run += 1;
                if run == n {
                    return Some(start);
                }
            }
            i += 1;
        }
        None
    }

    /// Lowest clear bit.
    #[must_use]
    pub fn find_free_single(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|&(_, &w)| w != u64::MAX)
            .map(|(i, &w)| i * BITS + (!w).trailing_zeros() as usize)
            .filter(|&index| index < self.len)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
