//! # Synchronization primitives for the simulator
//!
//! - [`SpinLock`]: test-and-test-and-set lock for short critical sections
//!   (bitmap and table updates).
//! - [`TicketLock`]: FIFO lock for the coarse allocation lock. Waiters are
//!   served in arrival order, so a thread blocked on `allocate`/`release`
//!   cannot be starved by a busy neighbour.
//! - [`SyncOnceCell`]: one-shot lazy initialization shared between threads.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;
mod ticket_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
pub use ticket_lock::{TicketLock, TicketLockGuard};
