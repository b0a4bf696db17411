//! # Address Space
//!
//! Everything that exists once the simulator is initialized: the pool, the
//! page directory at its root, both allocation bitmaps and the TLB.
//!
//! ## Locking
//!
//! The bitmaps sit behind the structures lock and are only handed out through
//! [`AddressSpace::with_structures`]. Table entries and TLB rows are atomics
//! inside the pool and the TLB, so [`translate`](AddressSpace::translate)
//! takes no lock at all. [`map`](AddressSpace::map) needs the bitmaps to
//! allocate inner tables and therefore runs under the structures lock.
//!
//! ## Reserved pages
//!
//! Virtual slot 0 is never handed out, so address 0 stays unmapped. The
//! frames holding the directory (`directory_frames`, starting at the root)
//! are marked used from the start.

use crate::bitmap::Bitmap;
use crate::config::VmConfig;
use crate::error::VmError;
use crate::page_table::{DirectoryEntry, PageDirectory, PageTable, TableEntry};
use crate::pool::PhysicalPool;
use crate::tlb::Tlb;
use log::{debug, trace};
use vm_addresses::{AddressLayout, FrameNumber, OuterIndex, PhysicalAddress, VirtualAddress};
use vm_sync::SpinLock;

/// Frame holding the first entry of a page directory.
pub type RootFrame = FrameNumber;

/// Allocation state guarded by the structures lock.
pub struct Bitmaps {
    /// One bit per virtual page slot.
    pub slots: Bitmap,
    /// One bit per physical frame.
    pub frames: Bitmap,
}

/// Occupancy snapshot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolUsage {
    /// Pages in the pool; also the number of virtual slots.
    pub total_pages: u32,
    /// Virtual slots in use, including the reserved slot 0.
    pub used_slots: u32,
    /// Frames in use, including the directory and inner tables.
    pub used_frames: u32,
    /// Inner page tables currently installed in the directory.
    pub inner_tables: u32,
}

pub struct AddressSpace {
    layout: AddressLayout,
    total_pages: u32,
    pool: PhysicalPool,
    root: RootFrame,
    structures: SpinLock<Bitmaps>,
    tlb: Tlb,
}

impl AddressSpace {
    /// Allocate the pool, bitmaps and TLB and reserve slot 0 and the directory.
    ///
    /// `layout` must be the one `config` validated to.
    #[must_use]
    pub fn new(config: &VmConfig, layout: AddressLayout) -> Self {
        let total_pages = config.total_pages();
        let pool = PhysicalPool::new(total_pages, layout.page_size());
        let root = FrameNumber::new(0);

        let mut slots = Bitmap::new(total_pages as usize);
        let mut frames = Bitmap::new(total_pages as usize);
        slots.set(0);
        for f in 0..layout.directory_frames().min(total_pages) {
            frames.set((root.as_u32() + f) as usize);
        }

        debug!(
            "address space: {total_pages} pages of {} bytes, split {}/{}/{}, directory in {} frame(s), {} TLB rows",
            layout.page_size(),
            layout.outer_bits(),
            layout.inner_bits(),
            layout.offset_bits(),
            layout.directory_frames(),
            config.tlb_entries,
        );

        Self {
            layout,
            total_pages,
            pool,
            root,
            structures: SpinLock::new(Bitmaps { slots, frames }),
            tlb: Tlb::new(config.tlb_entries, &layout),
        }
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub const fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// The root of this address space's page directory.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> RootFrame {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &PhysicalPool {
        &self.pool
    }

    #[inline]
    #[must_use]
    pub const fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    /// Run `f` with exclusive access to the allocation bitmaps.
    pub fn with_structures<R>(&self, f: impl FnOnce(&mut Bitmaps) -> R) -> R {
        self.structures.with_lock(f)
    }

    #[inline]
    const fn directory(&self, root: RootFrame) -> PageDirectory<'_> {
        PageDirectory::new(&self.pool, &self.layout, root)
    }

    #[inline]
    const fn table(&self, frame: FrameNumber) -> PageTable<'_> {
        PageTable::new(&self.pool, &self.layout, frame)
    }

    /// Translate `va` through this address space's own directory.
    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.translate_from(self.root, va)
    }

    /// Translate `va` to its pool offset, consulting the TLB first and then
    /// walking the directory rooted at `root`.
    ///
    /// `None` if the directory or table entry is absent. The TLB is not
    /// refilled on a miss; only [`map`](Self::map) installs rows.
    #[must_use]
    pub fn translate_from(&self, root: RootFrame, va: VirtualAddress) -> Option<PhysicalAddress> {
        let offset = self.layout.offset(va);
        let frame = match self.tlb.lookup(va) {
            Some(frame) => frame,
            None => self.walk(root, va)?,
        };
        Some(self.layout.join(frame, offset))
    }

    fn walk(&self, root: RootFrame, va: VirtualAddress) -> Option<FrameNumber> {
        let (outer, inner, _) = self.layout.split(va);
        let table = self.directory(root).get(outer).next_table()?;
        self.table(table).get(inner).frame()
    }

    /// Map the page containing `va` onto the frame containing `pa`.
    ///
    /// Creates the inner table on first use, taking a frame from `bitmaps`
    /// and zero-filling it. An entry that already holds the same frame is
    /// not rewritten. The TLB row for the page is refreshed in every case.
    ///
    /// # Errors
    /// - [`VmError::OutOfMemory`] if a new inner table is needed and no frame is free.
    /// - [`VmError::NotMapped`] if the table frame lies outside the pool.
    pub fn map(
        &self,
        bitmaps: &mut Bitmaps,
        va: VirtualAddress,
        pa: PhysicalAddress,
    ) -> Result<(), VmError> {
        let (outer, inner, _) = self.layout.split(va);
        let frame = self.layout.frame_of(pa);

        let table = match self.directory(self.root).get(outer).next_table() {
            Some(table) => table,
            None => self.new_table(bitmaps, outer, va)?,
        };

        let table = self.table(table);
        let entry = TableEntry::to_frame(frame);
        if table.get(inner) != entry {
            table.set(inner, entry).ok_or(VmError::NotMapped(va))?;
        }
        self.tlb.insert(va, frame);
        trace!("mapped {va} -> {frame}");
        Ok(())
    }

    fn new_table(
        &self,
        bitmaps: &mut Bitmaps,
        outer: OuterIndex,
        va: VirtualAddress,
    ) -> Result<FrameNumber, VmError> {
        let index = bitmaps
            .frames
            .find_free_single()
            .ok_or(VmError::OutOfMemory { pages: 1 })?;
        #[allow(clippy::cast_possible_truncation)]
        let frame = FrameNumber::new(index as u32);

        self.pool
            .zero(self.layout.frame_base(frame), self.layout.page_size())
            .ok_or(VmError::NotMapped(va))?;
        self.directory(self.root)
            .set(outer, DirectoryEntry::to_table(frame))
            .ok_or(VmError::NotMapped(va))?;
        bitmaps.frames.set(index);

        trace!("page table for directory entry {} in {frame}", outer.as_u32());
        Ok(frame)
    }

    /// Remove the leaf mapping for `va`'s page and drop its TLB row.
    ///
    /// Returns the frame that backed the page. Inner tables stay installed
    /// even when they become empty. Call under the structures lock.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] if the page has no mapping.
    pub fn unmap(&self, va: VirtualAddress) -> Result<FrameNumber, VmError> {
        let (outer, inner, _) = self.layout.split(va);
        let table = self
            .directory(self.root)
            .get(outer)
            .next_table()
            .ok_or(VmError::NotMapped(va))?;
        let table = self.table(table);
        let frame = table.get(inner).frame().ok_or(VmError::NotMapped(va))?;

        table
            .set(inner, TableEntry::absent())
            .ok_or(VmError::NotMapped(va))?;
        let dropped = self.tlb.invalidate(va);
        trace!("unmapped {va} from {frame}, tlb row dropped: {dropped}");
        Ok(frame)
    }

    /// Current slot and frame occupancy.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn usage(&self) -> PoolUsage {
        let directory = self.directory(self.root);
        let inner_tables = (0..self.layout.directory_entries())
            .filter(|&i| directory.get(OuterIndex::new(i)).next_table().is_some())
            .count() as u32;

        self.with_structures(|b| PoolUsage {
            total_pages: self.total_pages,
            used_slots: b.slots.count_set() as u32,
            used_frames: b.frames.count_set() as u32,
            inner_tables,
        })
    }
}
