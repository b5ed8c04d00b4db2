//! # Physical Memory Arenas
//!
//! An arena is one physically contiguous range of RAM reported by the
//! platform's memory map, together with the [`Page`] descriptors covering it.
//!
//! ```text
//!  base                                              base + size
//!  ┌────────┬────────┬────────┬────────┬─── ─ ─ ───┬────────┐
//!  │ page 0 │ page 1 │ page 2 │ page 3 │           │ page n │  physical frames
//!  └────────┴────────┴────────┴────────┴─── ─ ─ ───┴────────┘
//!      ▲        ▲        ▲        ▲                    ▲
//!  ┌───┴────────┴────────┴────────┴────────────────────┴───┐
//!  │          [Page; n]  (carved from the boot allocator)  │  descriptors
//!  └───────────────────────────────────────────────────────┘
//! ```
//!
//! Address ⇄ descriptor conversion is bounds-checked index arithmetic over
//! the descriptor slice. Arenas are created once during boot and are
//! immutable afterwards; only the descriptors' atomic fields change.

use crate::addr::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, is_page_aligned, pages_to_bytes};
use crate::boot::BootAllocator;
use crate::error::{PmmError, PmmResult};
use crate::flags::ArenaFlags;
use crate::page::{Page, PageState};
use crate::page_list::PageList;
use core::fmt;
use core::ops::{Add, AddAssign};
use core::ptr::NonNull;

/// Arena registration descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ArenaInfo {
    /// Diagnostic name.
    pub name: &'static str,
    pub flags: ArenaFlags,
    /// Search order; lower values are tried first.
    pub priority: u32,
    /// Page-aligned first byte.
    pub base: PhysicalAddress,
    /// Page-aligned, non-zero length in bytes.
    pub size: u64,
}

impl ArenaInfo {
    #[must_use]
    pub const fn new(
        name: &'static str,
        flags: ArenaFlags,
        priority: u32,
        base: PhysicalAddress,
        size: u64,
    ) -> Self {
        Self {
            name,
            flags,
            priority,
            base,
            size,
        }
    }

    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.size >> PAGE_SHIFT
    }
}

/// Number of pages in each [`PageState`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct StateCounts([u64; PageState::COUNT]);

impl StateCounts {
    #[must_use]
    pub const fn get(&self, state: PageState) -> u64 {
        self.0[state as usize]
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    const fn bump(&mut self, state: PageState) {
        self.0[state as usize] += 1;
    }
}

impl Add for StateCounts {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for StateCounts {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in PageState::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{state} {}", self.get(*state))?;
        }
        Ok(())
    }
}

/// One registered range of physical memory.
pub struct Arena {
    info: ArenaInfo,
    pages: &'static [Page],
}

impl Arena {
    /// Build the arena and its descriptor array.
    ///
    /// Every page starts out [`Free`](PageState::Free) and unlinked; the
    /// caller decides which list they go on.
    ///
    /// # Errors
    /// [`PmmError::NoMemory`] if the boot allocator cannot hold the
    /// descriptor array. Nothing is constructed in that case.
    ///
    /// # Panics
    /// If `base` or `size` is not page aligned, `size` is zero, or the range
    /// wraps the address space.
    pub(crate) fn init(info: ArenaInfo, boot: &mut dyn BootAllocator) -> PmmResult<Self> {
        assert!(
            is_page_aligned(info.base.as_u64()),
            "arena '{}': base {} not page aligned",
            info.name,
            info.base
        );
        assert!(
            is_page_aligned(info.size) && info.size > 0,
            "arena '{}': bad size {:#x}",
            info.name,
            info.size
        );
        assert!(
            info.base.checked_add(info.size).is_some(),
            "arena '{}': range wraps",
            info.name
        );

        let count = usize::try_from(info.page_count()).map_err(|_| PmmError::NoMemory)?;
        let bytes = count
            .checked_mul(size_of::<Page>())
            .ok_or(PmmError::NoMemory)?;
        let raw: NonNull<Page> = boot
            .alloc(bytes, align_of::<Page>())
            .ok_or(PmmError::NoMemory)?
            .cast();

        let mut paddr = info.base;
        for i in 0..count {
            // SAFETY: `raw` holds `count` uninitialized, suitably aligned descriptors.
            unsafe { raw.as_ptr().add(i).write(Page::new(paddr)) };
            paddr += PAGE_SIZE;
        }
        // SAFETY: all `count` descriptors were just initialized; boot memory is never freed.
        let pages: &'static [Page] = unsafe { core::slice::from_raw_parts(raw.as_ptr(), count) };

        Ok(Self { info, pages })
    }

    #[must_use]
    pub const fn info(&self) -> &ArenaInfo {
        &self.info
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.info.name
    }

    #[must_use]
    pub const fn flags(&self) -> ArenaFlags {
        self.info.flags
    }

    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.info.priority
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.info.base
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.info.size
    }

    /// One past the last byte of the arena.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.info.base.as_u64() + self.info.size)
    }

    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub const fn pages(&self) -> &'static [Page] {
        self.pages
    }

    #[must_use]
    pub const fn address_in_arena(&self, address: PhysicalAddress) -> bool {
        address.as_u64() >= self.info.base.as_u64() && address.as_u64() < self.end().as_u64()
    }

    /// Descriptor index of the page containing `address`.
    fn index_of(&self, address: PhysicalAddress) -> Option<usize> {
        if !self.address_in_arena(address) {
            return None;
        }
        usize::try_from((address.as_u64() - self.info.base.as_u64()) >> PAGE_SHIFT).ok()
    }

    /// Position of `page` in this arena's descriptor array.
    #[must_use]
    pub fn page_index(&self, page: &Page) -> Option<usize> {
        self.index_of(page.paddr())
    }

    /// The descriptor of the page containing `address`.
    #[must_use]
    pub fn find_specific(&self, address: PhysicalAddress) -> Option<&'static Page> {
        let pages = self.pages;
        pages.get(self.index_of(address)?)
    }

    /// First page of a run of `count` free pages whose physical start address
    /// is a multiple of `2^alignment_log2`.
    ///
    /// Linear in the arena size; only called with the node lock held.
    #[must_use]
    pub fn find_free_contiguous(&self, count: usize, alignment_log2: u32) -> Option<&'static Page> {
        if count == 0 || count > self.pages.len() {
            return None;
        }
        let align = 1u64.checked_shl(alignment_log2)?;
        let run_bytes = pages_to_bytes(count as u64);
        let pages = self.pages;

        let mut start = self.base().align_up(align)?;
        loop {
            let run_end = start.checked_add(run_bytes)?;
            if run_end > self.end() {
                return None;
            }
            let first = self.index_of(start)?;
            let window = &pages[first..first + count];
            match window.iter().rposition(|p| !p.is_free()) {
                None => return Some(&pages[first]),
                Some(busy) => {
                    // Nothing overlapping the busy page can start a run.
                    let after = window[busy].paddr() + PAGE_SIZE;
                    start = after.align_up(align)?;
                }
            }
        }
    }

    /// A list holding every descriptor, in address order.
    ///
    /// # Panics
    /// If any page is already linked somewhere.
    pub(crate) fn all_pages(&self) -> PageList {
        let mut list = PageList::new();
        for page in self.pages {
            list.link_back(page);
        }
        list
    }

    #[must_use]
    pub fn count_states(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for page in self.pages {
            counts.bump(page.state());
        }
        counts
    }

    /// Write a human readable description of the arena.
    ///
    /// With `dump_pages`, also lists every run of pages sharing a state.
    ///
    /// # Errors
    /// Propagates errors of the sink.
    pub fn dump(&self, out: &mut dyn fmt::Write, dump_pages: bool) -> fmt::Result {
        writeln!(
            out,
            "ARENA '{}': base {} size {:#x} ({} pages) priority {} flags {:#x}",
            self.name(),
            self.base(),
            self.size(),
            self.page_count(),
            self.priority(),
            self.flags().into_bits()
        )?;
        writeln!(out, "  page states: {}", self.count_states())?;

        if dump_pages {
            for run in self.pages.chunk_by(|a, b| a.state() == b.state()) {
                let first = run[0].paddr();
                let last = run[run.len() - 1].paddr() + (PAGE_SIZE - 1);
                writeln!(out, "    {first} - {last}: {}", run[0].state())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.info.name)
            .field("base", &self.info.base)
            .field("size", &self.info.size)
            .field("priority", &self.info.priority)
            .finish_non_exhaustive()
    }
}
