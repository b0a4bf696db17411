//! # Two-Level Virtual Memory Simulator
//!
//! A user-space model of a 32-bit paged memory system: a flat pool stands in
//! for physical RAM, a two-level page table kept inside that pool translates
//! virtual addresses, and a direct-mapped TLB caches recent translations.
//! Callers allocate, free, read and write virtual memory; the simulator does
//! the bookkeeping a kernel would.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              VirtualMemory (vmm)                    │
//! │    • allocate / release / read / write              │
//! │    • lazy one-time setup, allocation lock           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              AddressSpace (address_space)           │
//! │    • translate: TLB, then directory + table walk    │
//! │    • map / unmap, inner table creation              │
//! │    • slot and frame bitmaps (structures lock)       │
//! └────────┬───────────────────┬────────────────────────┘
//!          │                   │
//! ┌────────▼─────────┐ ┌───────▼──────────────────────────┐
//! │   Tlb (tlb)      │ │   PhysicalPool (pool)            │
//! │  tag → frame     │ │  page directory, page tables     │
//! │  hit/miss counts │ │  and data frames, byte-addressed │
//! └──────────────────┘ └──────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Configuration ([`config`])
//!
//! Page size, pool size and TLB size, fixed for the simulator's lifetime.
//! [`VmConfig::validate`] derives the [`AddressLayout`] and rejects sizes
//! that cannot hold a page directory.
//!
//! ### Physical pool ([`pool`])
//!
//! One zeroed host allocation of `total_pages` frames. Frame 0 onwards holds
//! the page directory; inner page tables and data pages take whatever frames
//! the frame bitmap hands out.
//!
//! ### Page tables ([`page_table`])
//!
//! Typed views of directory and table entries stored in the pool. An entry
//! is either absent or names a frame; there is no sentinel value.
//!
//! ### TLB ([`tlb`])
//!
//! Direct-mapped, indexed by virtual page number modulo the row count.
//! Refreshed by every mapping and invalidated on release, so it never
//! disagrees with the page tables. [`TlbStats`] reports the miss rate.
//!
//! ### Allocation ([`vmm`])
//!
//! Allocation is first-fit over virtual slots, with one frame per page.
//! Slot 0 is reserved, so the null address is never handed out.
//!
//! ## Concurrency
//!
//! [`VirtualMemory`] is `Sync`. Allocations and releases are serialized by a
//! ticket lock and bitmap changes by a spin lock; translation reads atomics
//! only. See the [`vmm`] module for the exact rules.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: setup, allocations and
//! releases at `debug`, mappings and TLB fills at `trace`, rejected requests
//! at `warn`. Install any logger to see them.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod address_space;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod page_table;
pub mod pool;
pub mod tlb;
pub mod vmm;

pub use address_space::{AddressSpace, Bitmaps, PoolUsage, RootFrame};
pub use config::{ENTRY_SIZE, MAX_MEMSIZE, MEMSIZE, PAGE_SIZE, TLB_ENTRIES, VmConfig};
pub use error::VmError;
pub use tlb::{Tlb, TlbDump, TlbRow, TlbStats};
pub use vm_addresses::{
    AddressLayout, FrameNumber, PageNumber, PhysicalAddress, VirtualAddress,
};
pub use vmm::VirtualMemory;
