//! Allocation and arena flag words.

use bitfield_struct::bitfield;

/// Allocation request flags.
///
/// Threaded through the allocation calls untouched; reserved for
/// memory-type aware placement. [`AllocFlags::ANY`] is the only value the
/// allocator core distinguishes today.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct AllocFlags {
    /// Prefer memory below 4 GiB.
    pub low_mem: bool,

    #[bits(31)]
    __: u32,
}

impl AllocFlags {
    /// No placement constraint.
    pub const ANY: Self = Self::new();
}

/// Properties of an arena, as reported by the platform's memory map.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ArenaFlags {
    /// The arena lies below 4 GiB.
    pub low_mem: bool,
    /// The arena lies above 4 GiB.
    pub high_mem: bool,

    #[bits(30)]
    __: u32,
}
