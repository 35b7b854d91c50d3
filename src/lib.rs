//! A buddy system allocator for physical page frames.
//!
//! The allocator manages a fixed pool of pages, identified by dense frame
//! numbers, and serves power-of-two sized blocks of them. Free blocks live
//! in one address-ordered list per order, linked through a caller-owned
//! slice of [`PageDescriptor`]s instead of raw pointers, so the structure
//! stays checkable and the whole crate is safe code.
//!
//! The crate is `no_std`; it talks to the outside world only through the
//! descriptor slice handed to [`BuddyAllocator::init`] and the [`log`]
//! facade used for diagnostics.
//!
//! ```
//! use pfalloc::{BuddyAllocator, PageDescriptor};
//!
//! let mut pool = vec![PageDescriptor::new(); 1 << 16];
//! let mut buddy = BuddyAllocator::new();
//! buddy.init(&mut pool).unwrap();
//!
//! let block = buddy.alloc_pages(3).unwrap();
//! assert_eq!(block.number() % 8, 0);
//! buddy.free_pages(block, 3);
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]

use core::fmt;
use displaydoc_lite::displaydoc;
use spin::Mutex;

mod buddy;
mod frame;
mod free_area;

pub use buddy::{
    buddy_of, is_aligned, order_for_count, pages_per_block, BuddyAllocator, MAX_ORDER,
};
pub use frame::{PageDescriptor, Pfn};

/// The result type used by all fallible allocator operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Errors reported by the allocator's fallible operations.
    ///
    /// Contract violations are deliberately not represented here; they
    /// abort (see the `# Panics` sections of the individual operations).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// the requested order is outside the valid range.
        OrderTooLarge,
        /// there's no free block of a sufficient order left.
        NoMemoryAvailable,
        /// the page is not free at any order.
        PageNotFree,
        /// the page pool doesn't hold even one top-order block.
        RegionTooSmall,
        /// the allocator already manages a page pool.
        AlreadyInitialized,
    }
}

/// Statistics of an allocator, counted in pages.
#[derive(Debug, Clone)]
pub struct AllocStats {
    /// The name of the allocator these stats belong to.
    pub name: &'static str,
    /// The number of pages that are currently handed out or reserved.
    pub allocated: usize,
    /// The number of pages that are sitting in the free-area table.
    pub free: usize,
    /// The number of pages this allocator manages in total.
    pub total: usize,
}

impl AllocStats {
    /// Creates empty stats for an allocator with the given name.
    pub const fn with_name(name: &'static str) -> Self {
        AllocStats {
            name,
            allocated: 0,
            free: 0,
            total: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;

        writeln!(f, "Allocated pages: {}", self.allocated)?;
        writeln!(f, "Free pages:      {}", self.free)?;
        writeln!(f, "Total pages:     {}", self.total)?;

        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;

        Ok(())
    }
}

/// A [`BuddyAllocator`] behind a spinlock, for sharing between contexts or
/// living in a `static`.
///
/// Every operation takes the lock for its full duration, so intermediate
/// table states never become visible to another caller.
///
/// ```
/// use pfalloc::{LockedAllocator, PageDescriptor};
///
/// static PMM: LockedAllocator<'static> = LockedAllocator::new();
///
/// let pool = Box::leak(vec![PageDescriptor::new(); 1 << 16].into_boxed_slice());
/// PMM.init(pool).unwrap();
///
/// let page = PMM.alloc_pages(0).unwrap();
/// PMM.free_pages(page, 0);
/// ```
pub struct LockedAllocator<'a>(Mutex<BuddyAllocator<'a>>);

impl<'a> LockedAllocator<'a> {
    /// Creates a new, uninitialized allocator behind a lock.
    pub const fn new() -> Self {
        LockedAllocator(Mutex::new(BuddyAllocator::new()))
    }

    /// Hands the allocator its page pool. See [`BuddyAllocator::init`].
    pub fn init(&self, pages: &'a mut [PageDescriptor]) -> Result<usize> {
        self.0.lock().init(pages)
    }

    /// Allocates a block of `2^order` pages. See
    /// [`BuddyAllocator::alloc_pages`].
    pub fn alloc_pages(&self, order: usize) -> Result<Pfn> {
        self.0.lock().alloc_pages(order)
    }

    /// Gives a block back to the allocator. See
    /// [`BuddyAllocator::free_pages`].
    pub fn free_pages(&self, pfn: Pfn, order: usize) {
        self.0.lock().free_pages(pfn, order)
    }

    /// Removes one specific page from future allocation. See
    /// [`BuddyAllocator::reserve_page`].
    pub fn reserve_page(&self, pfn: Pfn) -> Result<()> {
        self.0.lock().reserve_page(pfn)
    }

    /// Logs the free-area table. See [`BuddyAllocator::dump_state`].
    pub fn dump_state(&self) {
        self.0.lock().dump_state()
    }

    /// Returns a snapshot of the allocation statistics.
    pub fn stats(&self) -> AllocStats {
        self.0.lock().stats()
    }
}

impl Default for LockedAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}
