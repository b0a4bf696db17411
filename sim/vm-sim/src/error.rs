use vm_addresses::{LayoutError, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    /// No run of free virtual slots, or no free physical frame when one was needed.
    #[error("out of memory allocating {pages} page(s)")]
    OutOfMemory { pages: u32 },
    /// The address has no directory or page-table entry.
    #[error("access to unmapped address {0}")]
    NotMapped(VirtualAddress),
    /// Some page of the range is not currently allocated; nothing was freed.
    #[error("invalid free of {pages} page(s) at {address}")]
    InvalidFree { address: VirtualAddress, pages: u32 },
    #[error("zero-sized allocation")]
    ZeroSizedAllocation,
    #[error("invalid address layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
