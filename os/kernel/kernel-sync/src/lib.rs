//! # Kernel synchronization primitives
//!
//! The lock used by the physical memory manager and its collaborators. Every
//! lock is split into a *raw* part that only knows how to acquire and release
//! ([`RawLock`], [`RawUnlock`]) and the generic [`Mutex`] that owns the data
//! and hands out RAII guards.
//!
//! ```rust
//! use kernel_sync::TicketMutex;
//!
//! let m = TicketMutex::new(0_u64);
//! m.with_lock(|v| *v += 1);
//! assert_eq!(*m.lock(), 1);
//! assert!(!m.is_locked());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_ticket;

pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;

/// A FIFO-fair mutex; waiters are served in arrival order.
pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;

    /// Best-effort probe; the answer may be stale by the time it is read.
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
