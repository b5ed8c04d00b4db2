//! # The Physical Memory Node
//!
//! [`Node`] is the single source of truth for physical memory: it owns the
//! registered [`Arena`]s and one global free list of pages, and exposes the
//! allocate/free API every other subsystem uses.
//!
//! ## Phases
//!
//! - **Boot** ([`Node::add_arena`]): takes `&mut self` and runs without
//!   locking. They assert that the platform is
//!   still inside the boot window (no CPU active, interrupts off).
//! - **Runtime** (`alloc_*`, `free_*`, [`Node::enforce_fill`]): take `&self`
//!   and hold the node lock for their whole duration. None of them block;
//!   each either completes or fails immediately and leaves the node
//!   unchanged on failure.
//!
//! ## Free list order
//!
//! Freed pages go to the head of the free list and allocations are served
//! from the head, so recently touched pages are reused first. The bulk
//! [`Node::alloc_pages`] hands out the first `count` pages *in free-list
//! order*; those are **not** physically contiguous. Use
//! [`Node::alloc_contiguous`] for physically adjacent frames.

use crate::addr::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use crate::arena::{Arena, ArenaInfo, StateCounts};
use crate::boot::BootAllocator;
use crate::error::{PmmError, PmmResult};
use crate::flags::AllocFlags;
use crate::page::{Page, PageFrame, PageState};
use crate::page_list::PageList;
use crate::platform::Platform;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_sync::TicketMutex;
use log::{debug, info, trace, warn};

/// Maximum number of arenas a node can hold.
pub const MAX_ARENAS: usize = 16;

/// Byte written over every free page while fill checking is enforced.
pub const FREE_FILL_BYTE: u8 = 0x42;

const PAGE_BYTES: usize = PAGE_SIZE as usize;

const _: () = {
    assert!(MAX_ARENAS > 0);
    assert!(FREE_FILL_BYTE != 0);
};

/// Construction-time options of a [`Node`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct NodeConfig {
    free_fill: bool,
}

impl NodeConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self { free_fill: false }
    }

    /// Poison free pages and verify the poison on allocation.
    #[must_use]
    pub const fn with_free_fill(mut self, enabled: bool) -> Self {
        self.free_fill = enabled;
        self
    }

    #[must_use]
    pub const fn free_fill(&self) -> bool {
        self.free_fill
    }
}

/// State guarded by the node lock.
struct FreePool {
    list: PageList,
    /// Always equal to `list.len()`.
    count: u64,
    fill: bool,
}

impl FreePool {
    fn pop(&mut self) -> Option<&'static Page> {
        let page = self.list.unlink_front()?;
        self.count -= 1;
        Some(page)
    }

    /// Remove a specific free page.
    fn take(&mut self, page: &'static Page) {
        debug_assert!(page.is_free());
        // SAFETY: free pages are exactly the members of the free list.
        unsafe { self.list.remove(page) };
        self.count -= 1;
    }

    fn take_front(&mut self, count: usize) -> PageList {
        let list = self.list.split_front(count);
        self.count -= list.len() as u64;
        list
    }

    fn push(&mut self, page: &'static Page) {
        self.list.link_front(page);
        self.count += 1;
    }

    fn splice(&mut self, list: &mut PageList) {
        let n = list.len() as u64;
        self.list.prepend(list);
        self.count += n;
    }
}

/// The physical memory allocator.
pub struct Node<P: Platform> {
    platform: P,
    /// Sorted by ascending priority; only modified during boot.
    arenas: [Option<Arena>; MAX_ARENAS],
    arena_count: usize,
    total_bytes: u64,
    pool: TicketMutex<FreePool>,
    /// Lock-free mirror of `pool.count`, for diagnostics and estimates.
    free_count: AtomicU64,
    /// Lock-free mirror of `pool.fill`.
    fill_enforced: AtomicBool,
}

impl<P: Platform> Node<P> {
    #[must_use]
    pub const fn new(platform: P, config: NodeConfig) -> Self {
        Self {
            platform,
            arenas: [const { None }; MAX_ARENAS],
            arena_count: 0,
            total_bytes: 0,
            pool: TicketMutex::new(FreePool {
                list: PageList::new(),
                count: 0,
                fill: config.free_fill,
            }),
            free_count: AtomicU64::new(0),
            fill_enforced: AtomicBool::new(config.free_fill),
        }
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    fn assert_boot_window(&self, op: &str) {
        assert!(
            self.platform.in_boot_window(),
            "{op} called outside the boot window"
        );
    }

    /// Register a range of RAM.
    ///
    /// The descriptor array is carved out of `boot`, the arena is inserted
    /// before the first arena of strictly higher priority, and all of its
    /// pages are put on the free list.
    ///
    /// # Errors
    /// [`PmmError::NoMemory`] if the boot allocator cannot hold the
    /// descriptors or the arena table is full. The node is unchanged.
    ///
    /// # Panics
    /// Outside the boot window, or for a misaligned, empty or overlapping range.
    pub fn add_arena(&mut self, info: ArenaInfo, boot: &mut dyn BootAllocator) -> PmmResult<()> {
        self.assert_boot_window("add_arena");
        info!(
            "pmm: adding arena '{}' base {} size {:#x} priority {}",
            info.name, info.base, info.size, info.priority
        );

        if self.arena_count == MAX_ARENAS {
            warn!("pmm: arena table full, dropping '{}'", info.name);
            return Err(PmmError::NoMemory);
        }

        let arena = Arena::init(info, boot).inspect_err(|_| {
            warn!("pmm: no boot memory for descriptors of '{}'", info.name);
        })?;
        if let Some(other) = self
            .arenas()
            .find(|a| a.base() < arena.end() && arena.base() < a.end())
        {
            panic!(
                "arena '{}' [{}, {}) overlaps arena '{}' [{}, {})",
                info.name,
                arena.base(),
                arena.end(),
                other.name(),
                other.base(),
                other.end()
            );
        }
        let free = arena.all_pages();

        let len = self.arena_count;
        let pos = self
            .arenas()
            .position(|a| a.priority() > info.priority)
            .unwrap_or(len);
        self.arenas[len] = Some(arena);
        self.arenas[pos..=len].rotate_right(1);
        self.arena_count += 1;
        self.total_bytes += info.size;

        self.add_free_pages(free);
        Ok(())
    }

    /// Move a list of free pages onto the free list.
    ///
    /// # Panics
    /// Outside the boot window, or if a page is not in [`PageState::Free`].
    pub(crate) fn add_free_pages(&mut self, mut list: PageList) {
        self.assert_boot_window("add_free_pages");
        let pool = self.pool.get_mut();
        for page in &list {
            assert!(page.is_free(), "page {}: not free", page.paddr());
            if pool.fill {
                free_fill(&self.platform, page);
            }
        }
        pool.splice(&mut list);
        self.free_count.store(pool.count, Ordering::Relaxed);
    }

    /// Arenas in search order.
    pub fn arenas(&self) -> impl Iterator<Item = &Arena> {
        self.arenas[..self.arena_count].iter().flatten()
    }

    #[must_use]
    pub const fn arena_count(&self) -> usize {
        self.arena_count
    }

    /// The descriptor of the page containing `paddr`, if any arena covers it.
    #[must_use]
    pub fn page_at(&self, paddr: PhysicalAddress) -> Option<&'static Page> {
        self.arenas().find_map(|a| a.find_specific(paddr))
    }

    /// Allocate a single page from the head of the free list.
    ///
    /// # Errors
    /// [`PmmError::NoMemory`] if no page is free.
    pub fn alloc_page(&self, flags: AllocFlags) -> PmmResult<PageFrame> {
        trace!("pmm: alloc_page flags {:#x}", flags.into_bits());
        let mut pool = self.pool.lock();
        let Some(page) = pool.pop() else {
            debug!("pmm: alloc_page: out of memory");
            return Err(PmmError::NoMemory);
        };
        self.claim(page, pool.fill);
        self.publish(&pool);
        Ok(PageFrame::new(page))
    }

    /// Allocate `count` arbitrary pages.
    ///
    /// The pages are the first `count` entries of the free list; they are
    /// adjacent in free-list order, **not** physically contiguous.
    ///
    /// # Errors
    /// [`PmmError::NoMemory`] if fewer than `count` pages are free. Nothing
    /// is allocated in that case.
    pub fn alloc_pages(&self, count: usize, flags: AllocFlags) -> PmmResult<PageList> {
        match count {
            0 => return Ok(PageList::new()),
            1 => {
                let mut list = PageList::new();
                list.push_back(self.alloc_page(flags)?);
                return Ok(list);
            }
            _ => {}
        }
        trace!("pmm: alloc_pages {count} flags {:#x}", flags.into_bits());

        let mut pool = self.pool.lock();
        if pool.count < count as u64 {
            debug!("pmm: alloc_pages: {count} requested, {} free", pool.count);
            return Err(PmmError::NoMemory);
        }
        let list = pool.take_front(count);
        for page in &list {
            self.claim(page, pool.fill);
        }
        self.publish(&pool);
        Ok(list)
    }

    /// Allocate the specific pages `[align_down(address), +count pages)`.
    ///
    /// The whole range is checked before any page is taken, so a failed call
    /// leaves the free list untouched.
    ///
    /// # Errors
    /// [`PmmError::NotFound`] if any page of the range is not covered by an
    /// arena or is not free.
    pub fn alloc_range(&self, address: PhysicalAddress, count: usize) -> PmmResult<PageList> {
        let start = address.align_down(PAGE_SIZE);
        let mut list = PageList::new();
        if count == 0 {
            return Ok(list);
        }
        trace!("pmm: alloc_range {start} count {count}");

        let mut pool = self.pool.lock();
        let mut next = Some(start);
        for _ in 0..count {
            let page = next
                .and_then(|pa| self.page_at(pa))
                .filter(|p| p.is_free());
            let Some(page) = page else {
                debug!(
                    "pmm: alloc_range {start} count {count}: page {} unavailable",
                    next.unwrap_or_default()
                );
                return Err(PmmError::NotFound);
            };
            next = page.paddr().checked_add(PAGE_SIZE);
        }

        for i in 0..count as u64 {
            let pa = start + i * PAGE_SIZE;
            let Some(page) = self.page_at(pa) else {
                unreachable!("page {pa} vanished under the node lock");
            };
            pool.take(page);
            self.claim(page, pool.fill);
            list.link_back(page);
        }
        self.publish(&pool);
        Ok(list)
    }

    /// Allocate `count` physically contiguous pages whose base address is a
    /// multiple of `2^alignment_log2` (at least page aligned).
    ///
    /// Arenas are tried in search order. Returns the base address and the
    /// pages in address order.
    ///
    /// # Errors
    /// [`PmmError::NotFound`] if no arena holds a suitable run, or `count`
    /// is zero.
    pub fn alloc_contiguous(
        &self,
        count: usize,
        alignment_log2: u32,
        flags: AllocFlags,
    ) -> PmmResult<(PhysicalAddress, PageList)> {
        if count == 0 {
            return Err(PmmError::NotFound);
        }
        let alignment_log2 = alignment_log2.max(PAGE_SHIFT);
        trace!(
            "pmm: alloc_contiguous {count} align 2^{alignment_log2} flags {:#x}",
            flags.into_bits()
        );

        let mut pool = self.pool.lock();
        for arena in self.arenas() {
            let Some(first) = arena.find_free_contiguous(count, alignment_log2) else {
                continue;
            };
            let Some(index) = arena.page_index(first) else {
                continue;
            };

            let mut list = PageList::new();
            for page in &arena.pages()[index..index + count] {
                pool.take(page);
                self.claim(page, pool.fill);
                list.link_back(page);
            }
            self.publish(&pool);
            return Ok((first.paddr(), list));
        }

        debug!("pmm: alloc_contiguous: no run of {count} pages at align 2^{alignment_log2}");
        Err(PmmError::NotFound)
    }

    /// Return one page to the head of the free list.
    ///
    /// # Panics
    /// If the page is still linked into a list, already free, or an object
    /// page with outstanding pins.
    pub fn free_page(&self, frame: PageFrame) {
        let page = frame.into_page();
        assert!(!page.is_free(), "page {}: double free", page.paddr());
        assert!(
            !page.is_linked(),
            "page {}: freeing a page that is still on a list",
            page.paddr()
        );

        let mut pool = self.pool.lock();
        self.release(page, pool.fill);
        pool.push(page);
        self.publish(&pool);
    }

    /// Return a whole list of pages.
    ///
    /// The list is spliced onto the free list head in one step, keeping its
    /// order, so its first page is the next one handed out.
    ///
    /// # Panics
    /// As [`Node::free_page`], for any page of the list.
    pub fn free_list(&self, mut list: PageList) {
        if list.is_empty() {
            return;
        }
        let mut pool = self.pool.lock();
        self.release_list(&mut pool, &mut list);
        self.publish(&pool);
    }

    /// Best-effort number of free pages; may be stale by the time it is used.
    #[must_use]
    pub fn count_free_pages(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Combined size of all arenas in bytes.
    #[must_use]
    pub const fn count_total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Per-state page counts over all arenas.
    #[must_use]
    pub fn count_states(&self) -> StateCounts {
        self.arenas()
            .map(Arena::count_states)
            .fold(StateCounts::default(), |acc, c| acc + c)
    }

    #[must_use]
    pub fn is_fill_enforced(&self) -> bool {
        self.fill_enforced.load(Ordering::Relaxed)
    }

    /// Turn on fill checking and poison every page currently free.
    ///
    /// # Panics
    /// If fill checking is already enforced.
    pub fn enforce_fill(&self) {
        let mut pool = self.pool.lock();
        assert!(!pool.fill, "free fill already enforced");
        for page in &pool.list {
            free_fill(&self.platform, page);
        }
        pool.fill = true;
        self.fill_enforced.store(true, Ordering::Relaxed);
        info!("pmm: free fill enforced, {} pages poisoned", pool.count);
    }

    /// Write a description of the node and its arenas.
    ///
    /// With `is_panic`, the node lock is not taken: only lock-free mirrors
    /// are read, so the dump makes progress even if a faulted CPU holds it.
    ///
    /// # Errors
    /// Propagates errors of the sink.
    pub fn dump(&self, out: &mut dyn fmt::Write, is_panic: bool) -> fmt::Result {
        let (free, fill) = if is_panic {
            writeln!(
                out,
                "pmm node (unlocked dump, lock {})",
                if self.pool.is_locked() { "held" } else { "free" }
            )?;
            (self.count_free_pages(), self.is_fill_enforced())
        } else {
            let pool = self.pool.lock();
            (pool.count, pool.fill)
        };

        writeln!(
            out,
            "pmm node: {} arenas, {} bytes total, {free} free pages ({} MiB), free fill {}",
            self.arena_count,
            self.total_bytes,
            (free * PAGE_SIZE) >> 20,
            if fill { "on" } else { "off" }
        )?;
        for arena in self.arenas() {
            arena.dump(out, false)?;
        }
        Ok(())
    }

    /// Hand a page taken off the free list to its new owner.
    fn claim(&self, page: &'static Page, fill: bool) {
        assert!(page.is_free(), "page {}: allocating a non-free page", page.paddr());
        if fill {
            check_free_fill(&self.platform, page);
        }
        page.set_state(PageState::Alloc);
    }

    /// Validate a page coming back from a caller and mark it free.
    fn release(&self, page: &'static Page, fill: bool) {
        let state = page.state();
        assert!(state != PageState::Free, "page {}: double free", page.paddr());
        assert!(
            !(state == PageState::Object && page.pin_count() > 0),
            "page {}: freeing a page with {} pins",
            page.paddr(),
            page.pin_count()
        );
        page.set_state(PageState::Free);
        if fill {
            free_fill(&self.platform, page);
        }
    }

    /// Release every page of `list` (tail to head) and splice it onto the free list.
    fn release_list(&self, pool: &mut FreePool, list: &mut PageList) {
        for page in list.iter().rev() {
            self.release(page, pool.fill);
        }
        pool.splice(list);
    }

    fn publish(&self, pool: &FreePool) {
        debug_assert_eq!(pool.count, pool.list.len() as u64);
        self.free_count.store(pool.count, Ordering::Relaxed);
    }
}

/// Overwrite the contents of `page` with [`FREE_FILL_BYTE`].
fn free_fill<P: Platform>(platform: &P, page: &Page) {
    // SAFETY: the page belongs to a registered arena and is owned by the node.
    unsafe {
        let va = platform.phys_to_virt(page.paddr());
        core::ptr::write_bytes(va, FREE_FILL_BYTE, PAGE_BYTES);
    }
}

/// Verify that a free page still carries the poison pattern.
///
/// A mismatch means someone wrote to the page after freeing it.
fn check_free_fill<P: Platform>(platform: &P, page: &Page) {
    // SAFETY: as in `free_fill`; the page has not been handed out yet.
    let bytes = unsafe {
        let va = platform.phys_to_virt(page.paddr());
        core::slice::from_raw_parts(va.cast_const(), PAGE_BYTES)
    };
    if let Some(offset) = bytes.iter().position(|b| *b != FREE_FILL_BYTE) {
        panic!(
            "page {}: free fill corrupted at offset {offset:#x} (found {:#04x})",
            page.paddr(),
            bytes[offset]
        );
    }
}

impl<P: Platform> fmt::Debug for Node<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("arenas", &self.arena_count)
            .field("total_bytes", &self.total_bytes)
            .field("free_pages", &self.count_free_pages())
            .field("fill", &self.is_fill_enforced())
            .finish_non_exhaustive()
    }
}
