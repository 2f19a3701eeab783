//! # p2pmem synchronization primitives
//!
//! Two spinning locks behind one guard type:
//!
//! * [`SpinMutex`] (test-and-test-and-set) for short critical sections with
//!   no fairness needs, such as the pool bitmap scan-and-mark.
//! * [`TicketMutex`] (FIFO tickets) for the per-mapping slot table, where
//!   concurrent faults and the final release must be served in arrival order
//!   so release cannot be starved by a stream of faults.
//!
//! Both are `no_std` and never allocate.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;
mod raw_ticket;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;

pub type SpinMutex<T> = Mutex<T, RawSpin>;
pub type TicketMutex<T> = Mutex<T, RawTicket>;

/// Acquire side of a raw lock.
pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

/// Release side of a raw lock.
pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}
