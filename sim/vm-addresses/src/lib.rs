//! # Simulated 32-bit Address Types
//!
//! Strongly typed wrappers for the addresses and page numbers used by the
//! virtual-memory simulator, plus the [`AddressLayout`] that splits a virtual
//! address into its page-table fields.
//!
//! ## Overview
//!
//! The simulator emulates a 32-bit virtual address space backed by a flat
//! byte pool. Mixing up the different kinds of numbers involved is the most
//! common source of bugs in such code, so every kind gets its own type:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An opaque 32-bit address handed out to callers. |
//! | [`PhysicalAddress`] | A byte offset into the simulated physical pool. |
//! | [`PageNumber`] | A virtual page (slot) number; also the TLB tag. |
//! | [`FrameNumber`] | A physical frame number inside the pool. |
//! | [`OuterIndex`] / [`InnerIndex`] / [`PageOffset`] | The three fields of a virtual address. |
//!
//! ## Address decomposition
//!
//! With 4 KiB pages and 4-byte table entries a virtual address is split as
//! follows:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! | outer | inner | offset |
//! ```
//!
//! The outer index selects an entry of the page directory, the inner index
//! an entry of the page table that directory entry points to, and the offset
//! selects the byte inside the mapped frame. The widths are derived from the
//! page and entry size at runtime and always add up to 32:
//!
//! ```rust
//! # use vm_addresses::*;
//! let layout = AddressLayout::new(4096, 4).unwrap();
//! assert_eq!(layout.offset_bits(), 12);
//! assert_eq!(layout.inner_bits(), 10);
//! assert_eq!(layout.outer_bits(), 10);
//!
//! let va = VirtualAddress::new(0x0040_3123);
//! let (outer, inner, offset) = layout.split(va);
//! assert_eq!(outer.as_u32(), 1);
//! assert_eq!(inner.as_u32(), 3);
//! assert_eq!(offset.as_u32(), 0x123);
//! assert_eq!(layout.compose(outer, inner, offset), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod layout;
mod physical_address;
mod virtual_address;

pub use crate::layout::{
    ADDRESS_BITS, AddressLayout, InnerIndex, LayoutError, OuterIndex, PageOffset,
};
pub use crate::physical_address::{FrameNumber, PhysicalAddress};
pub use crate::virtual_address::{PageNumber, VirtualAddress};
