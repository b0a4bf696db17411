//! # Translation Lookaside Buffer
//!
//! A direct-mapped cache of recent translations. The tag is the virtual page
//! number (`va >> offset_bits`) and the row is `tag % rows`, so two pages
//! whose numbers differ by a multiple of the row count evict each other.
//!
//! Each row is one packed 64-bit word ([`TlbRow`]), read and replaced with
//! single atomic operations; lookups never block. Every lookup counts as a
//! check, and every lookup that does not return a frame counts as a miss.

use alloc::boxed::Box;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use log::trace;
use vm_addresses::{AddressLayout, FrameNumber, PageNumber, VirtualAddress};

/// Packed TLB row.
///
/// | Bits   | Field   |
/// |--------|---------|
/// | 0      | `valid` |
/// | 1..32  | `frame` |
/// | 32..64 | `tag`   |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct TlbRow {
    pub valid: bool,
    #[bits(31)]
    pub frame: u32,
    pub tag: u32,
}

/// Lookup counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TlbStats {
    /// Lookups performed.
    pub checks: u64,
    /// Lookups that found no valid row for the tag.
    pub misses: u64,
}

impl TlbStats {
    #[inline]
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.checks - self.misses
    }

    /// `misses / checks`, or `None` before the first lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn miss_rate(&self) -> Option<f64> {
        if self.checks == 0 {
            None
        } else {
            Some(self.misses as f64 / self.checks as f64)
        }
    }
}

impl fmt::Display for TlbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "miss: {} total: {} rate: ", self.misses, self.checks)?;
        match self.miss_rate() {
            Some(rate) => write!(f, "{rate:.6}"),
            None => f.write_str("n/a"),
        }
    }
}

pub struct Tlb {
    rows: Box<[AtomicU64]>,
    offset_bits: u32,
    checks: AtomicU64,
    misses: AtomicU64,
}

impl Tlb {
    /// An empty TLB with `rows` rows (at least one).
    #[must_use]
    pub fn new(rows: u32, layout: &AddressLayout) -> Self {
        let rows: Vec<AtomicU64> = (0..rows.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self {
            rows: rows.into_boxed_slice(),
            offset_bits: layout.offset_bits(),
            checks: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    const fn tag(&self, va: VirtualAddress) -> PageNumber {
        PageNumber::new(va.as_u32() >> self.offset_bits)
    }

    #[inline]
    fn row(&self, tag: PageNumber) -> &AtomicU64 {
        &self.rows[tag.as_usize() % self.rows.len()]
    }

    /// The cached frame for the page containing `va`.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<FrameNumber> {
        let tag = self.tag(va);
        self.checks.fetch_add(1, Ordering::Relaxed);

        let row = TlbRow::from_bits(self.row(tag).load(Ordering::Acquire));
        if row.valid() && row.tag() == tag.as_u32() {
            Some(FrameNumber::new(row.frame()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Cache `va`'s page as backed by `frame`, replacing whatever held the row.
    pub fn insert(&self, va: VirtualAddress, frame: FrameNumber) {
        let tag = self.tag(va);
        let row = TlbRow::new()
            .with_valid(true)
            .with_frame(frame.as_u32())
            .with_tag(tag.as_u32());
        self.row(tag).store(row.into_bits(), Ordering::Release);
        trace!("tlb: {tag} -> {frame}");
    }

    /// Drop the cached translation for `va`'s page.
    ///
    /// Only a row holding this exact tag is cleared; a row already reused by
    /// a conflicting page is left alone. Returns whether a row was cleared.
    #[must_use]
    pub fn invalidate(&self, va: VirtualAddress) -> bool {
        let tag = self.tag(va);
        let slot = self.row(tag);
        let current = TlbRow::from_bits(slot.load(Ordering::Acquire));
        if !current.valid() || current.tag() != tag.as_u32() {
            return false;
        }

        slot.compare_exchange(
            current.into_bits(),
            current.with_valid(false).into_bits(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .is_ok()
    }

    #[must_use]
    pub fn stats(&self) -> TlbStats {
        TlbStats {
            checks: self.checks.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn miss_rate(&self) -> Option<f64> {
        self.stats().miss_rate()
    }

    /// Snapshot of every row, with its index.
    pub fn rows(&self) -> impl Iterator<Item = (usize, TlbRow)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, r)| (i, TlbRow::from_bits(r.load(Ordering::Acquire))))
    }

    /// Printable listing of the valid rows.
    #[must_use]
    pub const fn dump(&self) -> TlbDump<'_> {
        TlbDump(self)
    }
}

/// Display adapter returned by [`Tlb::dump`]: one `row tag -> frame` line per
/// valid row.
pub struct TlbDump<'t>(&'t Tlb);

impl fmt::Display for TlbDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.rows().filter(|(_, r)| r.valid()) {
            writeln!(f, "{i:5}: page #{} -> frame #{}", row.tag(), row.frame())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn tlb(rows: u32) -> Tlb {
        Tlb::new(rows, &AddressLayout::new(4096, 4).unwrap())
    }

    fn va(page: u32, offset: u32) -> VirtualAddress {
        VirtualAddress::new((page << 12) | offset)
    }

    #[test]
    fn empty_tlb_misses() {
        let t = tlb(8);
        assert_eq!(t.len(), 8);
        assert_eq!(t.lookup(va(1, 0)), None);
        assert_eq!(t.stats(), TlbStats { checks: 1, misses: 1 });
    }

    #[test]
    fn hit_ignores_the_page_offset() {
        let t = tlb(8);
        t.insert(va(3, 0), FrameNumber::new(42));
        assert_eq!(t.lookup(va(3, 0xFFF)), Some(FrameNumber::new(42)));
        assert_eq!(t.lookup(va(3, 0x10)), Some(FrameNumber::new(42)));
        assert_eq!(t.stats(), TlbStats { checks: 2, misses: 0 });
    }

    #[test]
    fn conflicting_pages_evict_each_other() {
        let t = tlb(4);
        t.insert(va(1, 0), FrameNumber::new(10));
        t.insert(va(5, 0), FrameNumber::new(50));
        assert_eq!(t.lookup(va(1, 0)), None);
        assert_eq!(t.lookup(va(5, 0)), Some(FrameNumber::new(50)));
        assert_eq!(t.stats().misses, 1);
    }

    #[test]
    fn invalidate_only_clears_the_matching_tag() {
        let t = tlb(4);
        t.insert(va(5, 0), FrameNumber::new(50));
        // page 1 maps to the same row but is not the one cached
        assert!(!t.invalidate(va(1, 0)));
        assert_eq!(t.lookup(va(5, 0)), Some(FrameNumber::new(50)));

        assert!(t.invalidate(va(5, 0)));
        assert_eq!(t.lookup(va(5, 0)), None);
        assert!(!t.invalidate(va(5, 0)));
    }

    #[test]
    fn miss_rate_is_exact() {
        let t = tlb(16);
        assert_eq!(t.miss_rate(), None);
        t.insert(va(2, 0), FrameNumber::new(7));
        for offset in 0..3 {
            assert!(t.lookup(va(2, offset)).is_some());
        }
        assert!(t.lookup(va(9, 0)).is_none());
        assert_eq!(t.miss_rate(), Some(0.25));
        assert_eq!(t.stats().hits(), 3);
        assert_eq!(t.stats().to_string(), "miss: 1 total: 4 rate: 0.250000");
        assert_eq!(TlbStats::default().to_string(), "miss: 0 total: 0 rate: n/a");
    }

    #[test]
    fn dump_lists_valid_rows() {
        let t = tlb(4);
        t.insert(va(6, 0), FrameNumber::new(9));
        assert_eq!(t.dump().to_string(), "    2: page #6 -> frame #9\n");
        assert_eq!(t.rows().filter(|(_, r)| r.valid()).count(), 1);
    }
}
