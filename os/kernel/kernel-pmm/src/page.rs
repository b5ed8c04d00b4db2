//! Page descriptors and the ownership token handed to callers.
//!
//! Every page frame of every arena has exactly one [`Page`] descriptor. The
//! descriptors live in memory carved out by the boot allocator and are never
//! freed, so they are always reachable as `&'static Page`.
//!
//! A page is owned by exactly one party at a time:
//!
//! ```text
//!            alloc_*                      set_state(Object)
//!   ┌──────┐ ──────────────▶ ┌───────┐ ───────────────────▶ ┌────────┐
//!   │ Free │                 │ Alloc │                      │ Object │ (pins)
//!   └──────┘ ◀────────────── └───────┘ ◀─────────────────── └────────┘
//!   Node free list  free_*   caller's PageFrame / PageList
//! ```
//!
//! While free, the page belongs to the node's free list. Once allocated it is
//! represented by a [`PageFrame`], which cannot be copied; moving the token
//! moves ownership of the page.

use crate::addr::PhysicalAddress;
use bitfield_struct::bitfield;
use core::fmt;
use core::ops::Deref;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

/// Lifecycle state of a page frame.
///
/// `Free` and `Alloc` are managed by the node; the remaining states belong to
/// higher layers and are opaque to the allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum PageState {
    /// On the node's free list.
    Free = 0,
    /// Handed out by the allocator, not yet claimed by a higher layer.
    Alloc = 1,
    /// Owned by a VM object; may carry pins.
    Object = 2,
    /// Permanently reserved (kernel image, boot structures).
    Wired = 3,
}

impl PageState {
    /// Number of distinct states.
    pub const COUNT: usize = 4;

    /// All states, in encoding order.
    pub const ALL: [Self; Self::COUNT] = [Self::Free, Self::Alloc, Self::Object, Self::Wired];

    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::Free,
            1 => Self::Alloc,
            2 => Self::Object,
            3 => Self::Wired,
            _ => panic!("corrupt page state"),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Alloc => "alloc",
            Self::Object => "object",
            Self::Wired => "wired",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packed per-page metadata, stored in a single atomic word so that state
/// and pin count are always observed together.
#[bitfield(u32)]
struct PageMeta {
    #[bits(4)]
    state: PageState,
    /// Outstanding pins held by a higher layer (only in [`PageState::Object`]).
    #[bits(28)]
    pins: u32,
}

/// Largest representable pin count.
pub const MAX_PINS: u32 = (1 << 28) - 1;

/// Intrusive list hook embedded in every page.
///
/// Links are only touched by the current owner of the page (the node, under
/// its lock, or the holder of the [`PageList`](crate::PageList)), so relaxed
/// ordering suffices; ownership transfer provides the synchronization.
pub(crate) struct Link {
    prev: AtomicPtr<Page>,
    next: AtomicPtr<Page>,
    linked: AtomicBool,
}

impl Link {
    const fn new() -> Self {
        Self {
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            linked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn prev(&self) -> *const Page {
        self.prev.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn next(&self) -> *const Page {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_prev(&self, p: *const Page) {
        self.prev.store(p.cast_mut(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_next(&self, p: *const Page) {
        self.next.store(p.cast_mut(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn mark_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        self.set_prev(ptr::null());
        self.set_next(ptr::null());
        self.mark_linked(false);
    }
}

/// Descriptor of one physical page frame.
pub struct Page {
    paddr: PhysicalAddress,
    meta: AtomicU32,
    pub(crate) link: Link,
}

impl Page {
    /// A free, unlinked descriptor for the frame at `paddr`.
    pub(crate) const fn new(paddr: PhysicalAddress) -> Self {
        Self {
            paddr,
            meta: AtomicU32::new(PageMeta::new().with_state(PageState::Free).into_bits()),
            link: Link::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn paddr(&self) -> PhysicalAddress {
        self.paddr
    }

    #[inline]
    fn meta(&self) -> PageMeta {
        PageMeta::from_bits(self.meta.load(Ordering::Acquire))
    }

    #[inline]
    fn store_meta(&self, meta: PageMeta) {
        self.meta.store(meta.into_bits(), Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PageState {
        self.meta().state()
    }

    #[inline]
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state() == PageState::Free
    }

    #[inline]
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.meta().pins()
    }

    /// Whether the page currently sits on some list (the free list or a caller's).
    #[inline]
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.link.is_linked()
    }

    /// State change owned by the node. Clears any pins.
    #[inline]
    pub(crate) fn set_state(&self, state: PageState) {
        self.store_meta(PageMeta::new().with_state(state));
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta();
        f.debug_struct("Page")
            .field("paddr", &self.paddr)
            .field("state", &meta.state())
            .field("pins", &meta.pins())
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Ownership token for one allocated page.
///
/// Returned by the node's allocation calls and consumed by
/// [`Node::free_page`](crate::Node::free_page). It is deliberately neither
/// `Clone` nor `Copy`: holding a `PageFrame` means owning the page.
pub struct PageFrame {
    page: &'static Page,
}

impl PageFrame {
    #[inline]
    pub(crate) const fn new(page: &'static Page) -> Self {
        Self { page }
    }

    /// Rebuild the ownership token for a page found by address.
    ///
    /// Higher layers that keep only physical addresses (e.g. in page tables)
    /// use this together with [`Node::page_at`](crate::Node::page_at) to hand
    /// a page back to the allocator.
    ///
    /// # Safety
    /// The caller must own the page and no other `PageFrame` for it may exist.
    #[inline]
    #[must_use]
    pub const unsafe fn from_page(page: &'static Page) -> Self {
        Self { page }
    }

    /// Give up the token and keep only the descriptor.
    #[inline]
    #[must_use]
    pub const fn into_page(self) -> &'static Page {
        self.page
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> &'static Page {
        self.page
    }

    /// Move an owned page into a higher-layer state.
    ///
    /// # Panics
    /// If `state` is [`PageState::Free`]; pages become free only through the node.
    /// If the page still carries pins.
    pub fn set_state(&mut self, state: PageState) {
        assert!(
            state != PageState::Free,
            "page {}: only the node may mark a page free",
            self.page.paddr
        );
        let pins = self.page.pin_count();
        assert!(
            pins == 0,
            "page {}: state change to {state} with {pins} pins",
            self.page.paddr
        );
        self.page.set_state(state);
    }

    /// Take a pin on an object page; returns the new pin count.
    ///
    /// # Panics
    /// If the page is not in [`PageState::Object`] or the pin count overflows.
    pub fn pin(&mut self) -> u32 {
        let meta = self.page.meta();
        assert_eq!(
            meta.state(),
            PageState::Object,
            "page {}: pinning requires an object page",
            self.page.paddr
        );
        assert!(meta.pins() < MAX_PINS, "page {}: pin overflow", self.page.paddr);
        let pins = meta.pins() + 1;
        self.page.store_meta(meta.with_pins(pins));
        pins
    }

    /// Drop a pin; returns the remaining pin count.
    ///
    /// # Panics
    /// If the page carries no pins.
    pub fn unpin(&mut self) -> u32 {
        let meta = self.page.meta();
        assert!(meta.pins() > 0, "page {}: unpin without pin", self.page.paddr);
        let pins = meta.pins() - 1;
        self.page.store_meta(meta.with_pins(pins));
        pins
    }
}

impl Deref for PageFrame {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.page
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PageFrame").field(self.page).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak(paddr: u64) -> &'static Page {
        Box::leak(Box::new(Page::new(PhysicalAddress::new(paddr))))
    }

    #[test]
    fn new_page_is_free_and_unlinked() {
        let p = leak(0x5000);
        assert_eq!(p.paddr().as_u64(), 0x5000);
        assert!(p.is_free());
        assert_eq!(p.pin_count(), 0);
        assert!(!p.is_linked());
    }

    #[test]
    fn state_roundtrips_through_meta() {
        let p = leak(0x1000);
        for s in PageState::ALL {
            p.set_state(s);
            assert_eq!(p.state(), s);
        }
    }

    #[test]
    fn pins_track_object_pages() {
        let p = leak(0x2000);
        p.set_state(PageState::Alloc);
        let mut f = PageFrame::new(p);
        f.set_state(PageState::Object);
        assert_eq!(f.pin(), 1);
        assert_eq!(f.pin(), 2);
        assert_eq!(f.state(), PageState::Object);
        assert_eq!(f.unpin(), 1);
        assert_eq!(f.pin_count(), 1);
    }

    #[test]
    #[should_panic(expected = "pinning requires an object page")]
    fn pin_requires_object_state() {
        let p = leak(0x3000);
        p.set_state(PageState::Alloc);
        PageFrame::new(p).pin();
    }

    #[test]
    #[should_panic(expected = "only the node may mark a page free")]
    fn frame_cannot_mark_free() {
        let p = leak(0x4000);
        p.set_state(PageState::Alloc);
        PageFrame::new(p).set_state(PageState::Free);
    }

    #[test]
    fn set_state_clears_pins() {
        let p = leak(0x6000);
        p.set_state(PageState::Object);
        let mut f = PageFrame::new(p);
        f.pin();
        p.set_state(PageState::Alloc);
        assert_eq!(p.pin_count(), 0);
    }

    #[test]
    #[should_panic(expected = "with 1 pins")]
    fn pinned_page_keeps_its_state() {
        let p = leak(0x7000);
        p.set_state(PageState::Alloc);
        let mut f = PageFrame::new(p);
        f.set_state(PageState::Object);
        f.pin();
        f.set_state(PageState::Wired);
    }

    #[test]
    fn unpinned_object_page_can_change_state() {
        let p = leak(0x8000);
        p.set_state(PageState::Alloc);
        let mut f = PageFrame::new(p);
        f.set_state(PageState::Object);
        f.pin();
        f.unpin();
        f.set_state(PageState::Wired);
        assert_eq!(f.state(), PageState::Wired);
    }
}
