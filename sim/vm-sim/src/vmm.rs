//! # Virtual Memory Manager
//!
//! The public face of the simulator. [`VirtualMemory`] hands out page-granular
//! virtual allocations backed by frames of the pool and copies bytes in and
//! out of them through the translation path.
//!
//! The address space is created on first use. `allocate` initializes it
//! while holding the allocation lock; `read`, `write` and `translate` go
//! through the same once-cell, so whichever call comes first builds it.
//!
//! | Operation   | Locks taken                              |
//! |-------------|------------------------------------------|
//! | `allocate`  | allocation lock, then structures lock    |
//! | `release`   | allocation lock, then structures lock    |
//! | `read`      | none                                     |
//! | `write`     | none                                     |
//! | `translate` | none                                     |
//!
//! Byte accesses are atomic per byte but not per call: two threads writing
//! the same range concurrently interleave. Keep ranges disjoint or order
//! them externally.
//!
//! # Example
//! ```
//! use vm_sim::{VirtualMemory, VmConfig};
//!
//! let config = VmConfig::DEFAULT.with_pool_size(1 << 20);
//! let vm = VirtualMemory::new(config).unwrap();
//!
//! let va = vm.allocate(100).unwrap();
//! vm.write(va, b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(vm.read(va, &mut buf), 5);
//! assert_eq!(&buf, b"hello");
//!
//! vm.release(va, 100).unwrap();
//! assert!(vm.translate(va).is_none());
//! ```

use crate::address_space::{AddressSpace, Bitmaps, PoolUsage, RootFrame};
use crate::config::VmConfig;
use crate::error::VmError;
use crate::tlb::TlbStats;
use core::ops::Range;
use log::{debug, warn};
use vm_addresses::{AddressLayout, FrameNumber, PageNumber, PhysicalAddress, VirtualAddress};
use vm_sync::{SyncOnceCell, TicketLock};

pub struct VirtualMemory {
    config: VmConfig,
    layout: AddressLayout,
    alloc_lock: TicketLock<()>,
    space: SyncOnceCell<AddressSpace>,
}

impl VirtualMemory {
    /// Validate `config`; the pool itself is not allocated until first use.
    ///
    /// # Errors
    /// Whatever [`VmConfig::validate`] rejects.
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        let layout = config.validate()?;
        Ok(Self {
            config,
            layout,
            alloc_lock: TicketLock::new(()),
            space: SyncOnceCell::new(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &VmConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    /// Build the address space if it does not exist yet, and return it.
    ///
    /// Safe to call any number of times from any thread; exactly one caller
    /// performs the setup.
    #[must_use]
    pub fn initialize(&self) -> &AddressSpace {
        self.space
            .get_or_init(|| AddressSpace::new(&self.config, self.layout))
    }

    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.space.is_initialized()
    }

    /// The address space, if it has been created.
    #[inline]
    #[must_use]
    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.space.get()
    }

    /// Reserve `bytes` bytes (rounded up to whole pages) of virtual memory,
    /// each page backed by its own frame.
    ///
    /// Virtual pages are contiguous; their frames need not be.
    ///
    /// # Errors
    /// - [`VmError::ZeroSizedAllocation`] for `bytes == 0`.
    /// - [`VmError::OutOfMemory`] if no run of free slots is long enough, or
    ///   frames run out part way. In the latter case every page mapped by
    ///   this call is unmapped and returned before the error is reported.
    pub fn allocate(&self, bytes: u32) -> Result<VirtualAddress, VmError> {
        let pages = self.layout.pages_for(bytes);
        if pages == 0 {
            warn!("rejected zero-sized allocation");
            return Err(VmError::ZeroSizedAllocation);
        }

        let _serial = self.alloc_lock.lock();
        let space = self.initialize();
        let result = space.with_structures(|b| allocate_pages(space, b, pages));
        match result {
            Ok(va) => debug!("allocated {pages} page(s) at {va}"),
            Err(e) => warn!("{e}"),
        }
        result
    }

    /// Return the pages covering `[va, va + bytes)` to the free pools.
    ///
    /// Every page of the range must currently be allocated; otherwise nothing
    /// is freed. Leaf entries are cleared and TLB rows dropped, so later
    /// accesses fail. Frame contents are left as they were.
    ///
    /// A no-op before the address space exists or for `bytes == 0`.
    ///
    /// # Errors
    /// [`VmError::InvalidFree`] if the range starts in the reserved slot 0,
    /// runs past the pool, or covers an unallocated page.
    pub fn release(&self, va: VirtualAddress, bytes: u32) -> Result<(), VmError> {
        let Some(space) = self.space.get() else {
            return Ok(());
        };
        let pages = self.layout.pages_for(bytes);
        if pages == 0 {
            return Ok(());
        }

        let _serial = self.alloc_lock.lock();
        let result = space.with_structures(|b| release_pages(space, b, va, pages));
        match result {
            Ok(()) => debug!("released {pages} page(s) at {va}"),
            Err(e) => warn!("{e}"),
        }
        result
    }

    /// Copy `data` into virtual memory starting at `va`, byte by byte.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] with the first address that does not translate.
    /// Bytes before it have already been written.
    pub fn write(&self, va: VirtualAddress, data: &[u8]) -> Result<(), VmError> {
        let space = self.initialize();
        for (addr, &byte) in byte_addresses(va).zip(data) {
            let addr = addr.ok_or(VmError::NotMapped(va))?;
            let pa = space.translate(addr).ok_or(VmError::NotMapped(addr))?;
            space
                .pool()
                .write_byte(pa, byte)
                .ok_or(VmError::NotMapped(addr))?;
        }
        Ok(())
    }

    /// Copy bytes starting at `va` into `buf` until it is full or an address
    /// does not translate. Returns the number of bytes copied.
    pub fn read(&self, va: VirtualAddress, buf: &mut [u8]) -> usize {
        let space = self.initialize();
        let mut copied = 0;
        for (addr, slot) in byte_addresses(va).zip(buf.iter_mut()) {
            let byte = addr
                .and_then(|addr| space.translate(addr))
                .and_then(|pa| space.pool().read_byte(pa));
            let Some(byte) = byte else {
                break;
            };
            *slot = byte;
            copied += 1;
        }
        copied
    }

    /// Pool offset backing `va`, if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.initialize().translate(va)
    }

    /// Like [`translate`](Self::translate), walking an explicit directory root.
    #[must_use]
    pub fn translate_from(&self, root: RootFrame, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.initialize().translate_from(root, va)
    }

    /// Root of the page directory.
    #[must_use]
    pub fn root(&self) -> RootFrame {
        self.initialize().root()
    }

    /// TLB counters; all zero before the address space exists.
    #[must_use]
    pub fn tlb_stats(&self) -> TlbStats {
        self.space
            .get()
            .map_or_else(TlbStats::default, |s| s.tlb().stats())
    }

    /// `misses / checks`, or `None` before the first lookup.
    #[must_use]
    pub fn tlb_miss_rate(&self) -> Option<f64> {
        self.tlb_stats().miss_rate()
    }

    /// Occupancy of slots and frames, or `None` before the address space exists.
    #[must_use]
    pub fn usage(&self) -> Option<PoolUsage> {
        self.space.get().map(AddressSpace::usage)
    }
}

fn byte_addresses(va: VirtualAddress) -> impl Iterator<Item = Option<VirtualAddress>> {
    (0..=u32::MAX).map(move |i| va.checked_add(i))
}

fn slot_address(layout: &AddressLayout, slot: usize) -> Option<VirtualAddress> {
    layout.page_address(PageNumber::new(u32::try_from(slot).ok()?))
}

fn allocate_pages(
    space: &AddressSpace,
    b: &mut Bitmaps,
    pages: u32,
) -> Result<VirtualAddress, VmError> {
    let out_of_memory = VmError::OutOfMemory { pages };
    let start = b
        .slots
        .find_free_run(pages as usize)
        .ok_or(out_of_memory)?;
    let first = slot_address(space.layout(), start).ok_or(out_of_memory)?;

    let slots = start..start + pages as usize;
    for slot in slots.clone() {
        b.slots.set(slot);
    }

    for (backed, slot) in slots.clone().enumerate() {
        if let Err(e) = back_slot(space, b, slot) {
            unwind(space, b, slots, backed);
            return Err(match e {
                VmError::OutOfMemory { .. } => out_of_memory,
                other => other,
            });
        }
    }
    Ok(first)
}

fn back_slot(space: &AddressSpace, b: &mut Bitmaps, slot: usize) -> Result<(), VmError> {
    let va = slot_address(space.layout(), slot).ok_or(VmError::OutOfMemory { pages: 1 })?;
    let index = b
        .frames
        .find_free_single()
        .ok_or(VmError::OutOfMemory { pages: 1 })?;
    b.frames.set(index);

    #[allow(clippy::cast_possible_truncation)]
    let pa = space.layout().frame_base(FrameNumber::new(index as u32));
    space.map(b, va, pa).inspect_err(|_| b.frames.clear(index))
}

/// Undo a partial allocation: unmap the first `backed` slots of `slots`,
/// return their frames, and free every slot of the run.
fn unwind(space: &AddressSpace, b: &mut Bitmaps, slots: Range<usize>, backed: usize) {
    for slot in slots.clone().take(backed) {
        let frame = slot_address(space.layout(), slot).and_then(|va| space.unmap(va).ok());
        if let Some(frame) = frame {
            b.frames.clear(frame.as_usize());
        }
    }
    for slot in slots {
        b.slots.clear(slot);
    }
}

fn release_pages(
    space: &AddressSpace,
    b: &mut Bitmaps,
    va: VirtualAddress,
    pages: u32,
) -> Result<(), VmError> {
    let invalid = VmError::InvalidFree { address: va, pages };
    let first = space.layout().page_number(va).as_usize();
    let end = first.checked_add(pages as usize).ok_or(invalid)?;
    if first == 0 || end > b.slots.len() || !(first..end).all(|s| b.slots.test(s)) {
        return Err(invalid);
    }

    for slot in first..end {
        if let Some(page) = slot_address(space.layout(), slot) {
            match space.unmap(page) {
                Ok(frame) => b.frames.clear(frame.as_usize()),
                Err(e) => warn!("releasing {page}: {e}"),
            }
        }
        b.slots.clear(slot);
    }
    Ok(())
}
