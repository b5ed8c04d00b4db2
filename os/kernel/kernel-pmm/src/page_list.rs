//! Intrusive list of page frames.
//!
//! The list owns the pages linked into it: pushing consumes a [`PageFrame`]
//! and popping hands one back. The links themselves live in the [`Page`]
//! descriptors, so the list header is three words regardless of its length
//! and splicing two lists is O(1).

use crate::page::{Page, PageFrame};
use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem;
use core::ptr;

/// Resolve a link pointer.
#[inline]
fn page_ref(p: *const Page) -> Option<&'static Page> {
    // SAFETY: every pointer stored in a link or list header was taken from a
    // `&'static Page`; descriptors are never freed or moved.
    unsafe { p.as_ref() }
}

/// Doubly linked list of owned pages.
///
/// # Invariants
/// - `len` equals the number of pages reachable from `head`.
/// - Each member has its `linked` flag set and belongs to no other list.
pub struct PageList {
    head: *const Page,
    tail: *const Page,
    len: usize,
}

// Safety: the list owns its pages; links are atomics and only touched by the owner.
unsafe impl Send for PageList {}
unsafe impl Sync for PageList {}

impl Default for PageList {
    fn default() -> Self {
        Self::new()
    }
}

impl PageList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: ptr::null(),
            tail: ptr::null(),
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn front(&self) -> Option<&'static Page> {
        page_ref(self.head)
    }

    #[inline]
    #[must_use]
    pub fn back(&self) -> Option<&'static Page> {
        page_ref(self.tail)
    }

    pub fn push_front(&mut self, frame: PageFrame) {
        self.link_front(frame.into_page());
    }

    pub fn push_back(&mut self, frame: PageFrame) {
        self.link_back(frame.into_page());
    }

    pub fn pop_front(&mut self) -> Option<PageFrame> {
        self.unlink_front().map(PageFrame::new)
    }

    pub fn pop_back(&mut self) -> Option<PageFrame> {
        self.unlink_back().map(PageFrame::new)
    }

    pub(crate) fn link_front(&mut self, page: &'static Page) {
        assert!(
            !page.link.is_linked(),
            "page {} is already on a list",
            page.paddr()
        );
        page.link.set_prev(ptr::null());
        page.link.set_next(self.head);
        match page_ref(self.head) {
            Some(head) => head.link.set_prev(page),
            None => self.tail = ptr::from_ref(page),
        }
        self.head = ptr::from_ref(page);
        page.link.mark_linked(true);
        self.len += 1;
    }

    pub(crate) fn link_back(&mut self, page: &'static Page) {
        assert!(
            !page.link.is_linked(),
            "page {} is already on a list",
            page.paddr()
        );
        page.link.set_next(ptr::null());
        page.link.set_prev(self.tail);
        match page_ref(self.tail) {
            Some(tail) => tail.link.set_next(page),
            None => self.head = ptr::from_ref(page),
        }
        self.tail = ptr::from_ref(page);
        page.link.mark_linked(true);
        self.len += 1;
    }

    pub(crate) fn unlink_front(&mut self) -> Option<&'static Page> {
        let page = page_ref(self.head)?;
        // SAFETY: `page` is the head of this list.
        unsafe { self.remove(page) };
        Some(page)
    }

    pub(crate) fn unlink_back(&mut self) -> Option<&'static Page> {
        let page = page_ref(self.tail)?;
        // SAFETY: `page` is the tail of this list.
        unsafe { self.remove(page) };
        Some(page)
    }

    /// Unlink `page` from anywhere in the list in O(1).
    ///
    /// # Safety
    /// `page` must be a member of *this* list.
    pub(crate) unsafe fn remove(&mut self, page: &'static Page) {
        debug_assert!(page.link.is_linked());
        let prev = page.link.prev();
        let next = page.link.next();
        match page_ref(prev) {
            Some(p) => p.link.set_next(next),
            None => self.head = next,
        }
        match page_ref(next) {
            Some(n) => n.link.set_prev(prev),
            None => self.tail = prev,
        }
        page.link.clear();
        self.len -= 1;
    }

    /// Move all of `other` in front of this list's head in O(1).
    pub fn prepend(&mut self, other: &mut Self) {
        let mut other = mem::take(other);
        if other.is_empty() {
            return;
        }
        if let Some(head) = page_ref(self.head) {
            head.link.set_prev(other.tail);
            if let Some(tail) = page_ref(other.tail) {
                tail.link.set_next(head);
            }
        } else {
            self.tail = other.tail;
        }
        self.head = other.head;
        self.len += other.len;
        other.forget();
    }

    /// Move all of `other` behind this list's tail in O(1).
    pub fn append(&mut self, other: &mut Self) {
        let mut other = mem::take(other);
        if other.is_empty() {
            return;
        }
        if let Some(tail) = page_ref(self.tail) {
            tail.link.set_next(other.head);
            if let Some(head) = page_ref(other.head) {
                head.link.set_prev(tail);
            }
        } else {
            self.head = other.head;
        }
        self.tail = other.tail;
        self.len += other.len;
        other.forget();
    }

    /// Detach the first `count` pages as a new list, preserving their order.
    ///
    /// Takes the whole list if `count >= len`. O(`count`).
    #[must_use]
    pub fn split_front(&mut self, count: usize) -> Self {
        if count == 0 {
            return Self::new();
        }
        if count >= self.len {
            return mem::take(self);
        }

        let mut last = self.head;
        for _ in 1..count {
            last = page_ref(last).map_or(ptr::null(), |p| p.link.next());
        }
        let Some(last) = page_ref(last) else {
            unreachable!("page list shorter than its length");
        };
        let rest = last.link.next();
        last.link.set_next(ptr::null());
        if let Some(r) = page_ref(rest) {
            r.link.set_prev(ptr::null());
        }

        let front = Self {
            head: self.head,
            tail: last,
            len: count,
        };
        self.head = rest;
        self.len -= count;
        front
    }

    /// Iterate from head to tail.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            front: self.head,
            back: self.tail,
            remaining: self.len,
            _list: PhantomData,
        }
    }

    /// Reset the header without touching the pages; they now belong elsewhere.
    fn forget(&mut self) {
        self.head = ptr::null();
        self.tail = ptr::null();
        self.len = 0;
    }
}

impl Drop for PageList {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!("dropping page list with {} pages; they are leaked", self.len);
        }
    }
}

impl fmt::Debug for PageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(Page::paddr))
            .finish()
    }
}

impl Extend<PageFrame> for PageList {
    fn extend<I: IntoIterator<Item = PageFrame>>(&mut self, iter: I) {
        for frame in iter {
            self.push_back(frame);
        }
    }
}

impl FromIterator<PageFrame> for PageList {
    fn from_iter<I: IntoIterator<Item = PageFrame>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

/// Borrowing iterator over the pages of a [`PageList`].
pub struct Iter<'a> {
    front: *const Page,
    back: *const Page,
    remaining: usize,
    _list: PhantomData<&'a PageList>,
}

impl Iterator for Iter<'_> {
    type Item = &'static Page;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let page = page_ref(self.front)?;
        self.front = page.link.next();
        self.remaining -= 1;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let page = page_ref(self.back)?;
        self.back = page.link.prev();
        self.remaining -= 1;
        Some(page)
    }
}

impl ExactSizeIterator for Iter<'_> {}
impl FusedIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a PageList {
    type Item = &'static Page;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owning iterator; yields the frames from head to tail.
pub struct IntoIter {
    list: PageList,
}

impl Iterator for IntoIter {
    type Item = PageFrame;

    fn next(&mut self) -> Option<PageFrame> {
        self.list.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.list.len(), Some(self.list.len()))
    }
}

impl DoubleEndedIterator for IntoIter {
    fn next_back(&mut self) -> Option<PageFrame> {
        self.list.pop_back()
    }
}

impl ExactSizeIterator for IntoIter {}

impl IntoIterator for PageList {
    type Item = PageFrame;
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        IntoIter { list: self }
    }
}
