//! # Platform Hooks
//!
//! The node needs three things from the machine it runs on:
//!
//! - a way to *touch* the contents of a physical page (only for the
//!   fill-poison check; the allocator itself never dereferences frames),
//! - the number of CPUs that have been brought online, and
//! - whether interrupts are enabled on the calling CPU.
//!
//! The last two guard the boot window: arena registration is lock-free and
//! therefore only legal while a single CPU runs with interrupts off.
//!
//! In the kernel, [`HhdmPlatform`] provides these via the higher-half direct
//! map. Tests supply their own implementation backed by host memory.

use crate::addr::PhysicalAddress;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Machine services consumed by [`Node`](crate::Node).
pub trait Platform: Sync {
    /// Virtual address through which the frame at `pa` can be accessed.
    ///
    /// # Safety
    /// `pa` must lie within a registered arena. The returned pointer is valid
    /// for reads and writes of one page.
    unsafe fn phys_to_virt(&self, pa: PhysicalAddress) -> *mut u8;

    /// Number of CPUs marked active by the scheduler.
    fn active_cpu_count(&self) -> usize;

    /// Whether interrupts are enabled on the calling CPU.
    fn interrupts_enabled(&self) -> bool;

    /// True while the boot window is open: no CPU is active yet and
    /// interrupts are off.
    fn in_boot_window(&self) -> bool {
        self.active_cpu_count() == 0 && !self.interrupts_enabled()
    }
}

/// [`Platform`] for kernels with a higher-half direct map (HHDM).
///
/// Every physical address is reachable at `hhdm_base + pa`. The active-CPU
/// count is read from a counter owned by the scheduler's bring-up code.
///
/// # Safety
/// - The HHDM mapping must be present and cover every registered arena.
pub struct HhdmPlatform {
    hhdm_base: u64,
    active_cpus: &'static AtomicUsize,
}

impl HhdmPlatform {
    #[must_use]
    pub const fn new(hhdm_base: u64, active_cpus: &'static AtomicUsize) -> Self {
        Self {
            hhdm_base,
            active_cpus,
        }
    }

    #[must_use]
    pub const fn hhdm_base(&self) -> u64 {
        self.hhdm_base
    }
}

impl Platform for HhdmPlatform {
    unsafe fn phys_to_virt(&self, pa: PhysicalAddress) -> *mut u8 {
        (self.hhdm_base + pa.as_u64()) as *mut u8
    }

    fn active_cpu_count(&self) -> usize {
        self.active_cpus.load(Ordering::Acquire)
    }

    fn interrupts_enabled(&self) -> bool {
        kernel_sync::irq::interrupts_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static CPUS: AtomicUsize = AtomicUsize::new(0);

    #[test]
    fn hhdm_translation_adds_base() {
        let p = HhdmPlatform::new(0xffff_8880_0000_0000, &CPUS);
        let va = unsafe { p.phys_to_virt(PhysicalAddress::new(0x1234_5000)) };
        assert_eq!(va as u64, 0xffff_8880_1234_5000);
        assert_eq!(p.hhdm_base(), 0xffff_8880_0000_0000);
    }

    #[test]
    fn active_cpus_come_from_counter() {
        static LOCAL: AtomicUsize = AtomicUsize::new(0);
        let p = HhdmPlatform::new(0, &LOCAL);
        assert_eq!(p.active_cpu_count(), 0);
        LOCAL.store(3, Ordering::Release);
        assert_eq!(p.active_cpu_count(), 3);
        assert!(!p.in_boot_window());
    }
}
