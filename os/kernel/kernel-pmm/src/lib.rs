//! # Physical Memory Manager
//!
//! Tracks every 4 KiB frame of RAM the kernel may use and hands frames out
//! to the rest of the kernel.
//!
//! ## Building blocks
//! - [`Page`]: one descriptor per frame, holding its state, pin count and an
//!   intrusive list link. Descriptors live forever in memory carved out of a
//!   [`BootAllocator`].
//! - [`PageFrame`]: the ownership token for an allocated page. It cannot be
//!   copied, so a page has exactly one owner at a time.
//! - [`PageList`]: an intrusive, allocation-free list of owned pages.
//! - [`Arena`]: a contiguous range of RAM and its descriptor array.
//! - [`Node`]: all arenas plus the global free list, behind one lock.
//!
//! ## Typical bring-up
//!
//! ```text
//!   firmware memory map ──► BumpAllocator (descriptor storage)
//!                                 │
//!   ArenaInfo per usable range ──►│ Node::add_arena (boot window, &mut)
//!                                 ▼
//!              Node shared by all CPUs ──► alloc_* / free_* (&self, locked)
//! ```
//!
//! ```rust,ignore
//! let mut node = Node::new(HhdmPlatform::new(hhdm, &ACTIVE_CPUS), NodeConfig::new());
//! node.add_arena(ArenaInfo::new("ram", ArenaFlags::new(), 0, base, size), &mut bump)?;
//!
//! let frame = node.alloc_page(AllocFlags::ANY)?;
//! node.free_page(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod addr;
mod arena;
mod boot;
mod error;
mod flags;
mod node;
mod page;
mod page_list;
mod platform;

pub use addr::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, is_page_aligned, pages_to_bytes};
pub use arena::{Arena, ArenaInfo, StateCounts};
pub use boot::{BootAllocator, BumpAllocator};
pub use error::{PmmError, PmmResult};
pub use flags::{AllocFlags, ArenaFlags};
pub use node::{FREE_FILL_BYTE, MAX_ARENAS, Node, NodeConfig};
pub use page::{MAX_PINS, Page, PageFrame, PageState};
pub use page_list::{IntoIter, Iter, PageList};
pub use platform::{HhdmPlatform, Platform};
