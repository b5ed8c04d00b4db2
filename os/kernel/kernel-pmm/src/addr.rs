//! Physical addresses and page arithmetic.

use core::fmt;
use core::ops::{Add, AddAssign};

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Size of one page frame in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PAGE_SIZE == 4096);
};

/// Whether `v` is a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn is_page_aligned(v: u64) -> bool {
    v & (PAGE_SIZE - 1) == 0
}

/// Bytes covered by `pages` page frames.
#[inline]
#[must_use]
pub const fn pages_to_bytes(pages: u64) -> u64 {
    pages << PAGE_SHIFT
}

/// Physical memory address.
///
/// A thin wrapper around `u64` that denotes **physical** addresses (host RAM).
/// Keeping it distinct from plain integers prevents mixing page counts,
/// indices and addresses in allocator arithmetic.
///
/// ### Examples
/// ```rust
/// # use kernel_pmm::{PhysicalAddress, PAGE_SIZE};
/// let pa = PhysicalAddress::new(0x0010_2042);
/// assert_eq!(pa.align_down(PAGE_SIZE).as_u64(), 0x0010_2000);
/// assert_eq!(pa.align_up(PAGE_SIZE).unwrap().as_u64(), 0x0010_3000);
/// assert!(!pa.is_aligned(PAGE_SIZE));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Round down to a multiple of `align` (a power of two).
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self(self.0 & !(align - 1))
    }

    /// Round up to a multiple of `align` (a power of two); `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Option<Self> {
        debug_assert!(align.is_power_of_two());
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(v: PhysicalAddress) -> Self {
        v.0
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
