//! # Boot-Time Bump Allocation
//!
//! Before the node exists there is nothing to allocate page descriptors
//! from. The platform hands the PMM a [`BootAllocator`] that carves memory
//! out of a region reserved during early boot.
//!
//! ## WARNING
//!
//! - Memory handed out here is **never** reclaimed; it backs structures that
//!   live for the rest of the kernel's lifetime.
//! - Only use a boot allocator during the boot window, before secondary CPUs
//!   run and before the node serves allocations.

use core::mem::MaybeUninit;
use core::ptr::NonNull;

/// Source of permanent memory for PMM metadata.
pub trait BootAllocator {
    /// Allocate `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns `None` if the request cannot be satisfied. The returned memory
    /// is uninitialized and stays valid for `'static`.
    fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;
}

/// Bump allocator over a single `'static` region.
///
/// - Never frees.
/// - Fails (instead of panicking) once the region is exhausted.
pub struct BumpAllocator {
    region: &'static mut [MaybeUninit<u8>],
    next: usize,
}

impl BumpAllocator {
    /// Manage the whole of `region`.
    #[must_use]
    pub const fn new(region: &'static mut [MaybeUninit<u8>]) -> Self {
        Self { region, next: 0 }
    }

    /// Bytes handed out so far, including alignment padding.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.next
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.region.len() - self.next
    }
}

impl BootAllocator for BumpAllocator {
    fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        let base = self.region.as_mut_ptr().cast::<u8>();
        let addr = base as usize + self.next;
        let padding = addr.wrapping_neg() & (align - 1);
        let start = self.next.checked_add(padding)?;
        let end = start.checked_add(size)?;
        if end > self.region.len() {
            return None;
        }
        self.next = end;
        // SAFETY: start < region.len(), so the pointer stays in bounds and is non-null.
        NonNull::new(unsafe { base.add(start) })
    }
}
