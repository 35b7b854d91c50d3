//! The buddy system allocator on top of the free-area table.
//!
//! Every block covers `2^order` pages and starts at a frame number that is
//! a multiple of its size, so any block can be split into two halves one
//! order below, and two adjacent halves, the buddies, can be merged back:
//!
//! ```text
//! order 2:  [       0       ][       4       ]
//! order 1:  [   0   ][   2   ][   4   ][   6  ]
//! order 0:  [ 0 ][ 1 ][ 2 ][ 3 ][ 4 ][ 5 ][ 6 ][ 7 ]
//! ```
//!
//! Allocation splits the lowest-address block of the smallest sufficient
//! order down to the requested size; freeing re-inserts the block and
//! eagerly merges buddies upwards, so two free neighbors never stay
//! separate in the same list.

use crate::frame::{PageDescriptor, Pfn};
use crate::free_area::{Blocks, FreeTable, Slot};
use crate::{AllocStats, Error, Result};
use core::cmp;
use log::{debug, warn};

/// The number of block orders this allocator distinguishes.
///
/// Valid orders are `0..MAX_ORDER`; the largest block covers
/// `2^(MAX_ORDER - 1)` pages.
pub const MAX_ORDER: usize = 17;

/// Returns the number of pages a block of the given order covers.
///
/// Valid for orders in `0..MAX_ORDER`; callers check the range.
pub const fn pages_per_block(order: usize) -> usize {
    1 << order
}

/// Returns whether a page can head a block of the given order, which is the
/// case iff its frame number is a multiple of the block size.
pub const fn is_aligned(pfn: Pfn, order: usize) -> bool {
    pfn.number() % pages_per_block(order) == 0
}

/// Returns the buddy of the given block: the neighbor block that merges
/// with it into the order `order + 1` block containing both.
///
/// Returns `None` for top-order blocks, which have no buddy, and for pages
/// that are not aligned to `order` and so head no order-`order` block.
pub fn buddy_of(pfn: Pfn, order: usize) -> Option<Pfn> {
    if order >= MAX_ORDER - 1 || !is_aligned(pfn, order) {
        return None;
    }

    // A block that is also aligned to the next order is the lower half of
    // its parent, so its buddy sits right above it. Otherwise it is the
    // upper half and the buddy sits below.
    let step = pages_per_block(order);
    if is_aligned(pfn, order + 1) {
        Some(Pfn::new(pfn.number() + step))
    } else {
        Some(Pfn::new(pfn.number() - step))
    }
}

/// Returns the smallest order whose blocks hold at least `count` pages.
///
/// The result can exceed the largest valid order if `count` does not fit
/// into one top-order block; callers check.
pub fn order_for_count(count: usize) -> usize {
    count.next_power_of_two().trailing_zeros() as usize
}

/// Splits the free block held in `slot` into its two halves, moving them
/// one order down, and returns the lower half.
///
/// # Panics
///
/// Panics if the slot holds no block, if `source_order` cannot be split any
/// further, or if the block is not aligned for `source_order`.
fn split_block(table: &mut FreeTable<'_>, slot: Slot, source_order: usize) -> Pfn {
    assert!(
        source_order >= 1 && source_order < MAX_ORDER,
        "split_block: order {} cannot be split",
        source_order
    );
    let pfn = match table.block_at(slot) {
        Some(pfn) => pfn,
        None => panic!("split_block: slot {:?} holds no block", slot),
    };
    assert!(
        is_aligned(pfn, source_order),
        "split_block: {:?} is not aligned for order {}",
        pfn,
        source_order
    );

    table.remove(pfn, source_order);

    // The lower half keeps the head frame number, the upper half starts
    // one child-block size above it:
    //
    //  [        2^k        ]  ->  [ 2^(k-1) ][ 2^(k-1) ]
    //  pfn                        pfn        pfn + 2^(k-1)
    table.insert(pfn, source_order - 1);
    let upper = buddy_of(pfn, source_order - 1)
        .expect("the lower half of a split block always has a buddy");
    table.insert(upper, source_order - 1);

    pfn
}

/// Merges the free block held in `slot` with its buddy, replacing the pair
/// with one block a single order up, and returns the slot of that block.
/// The total number of free pages does not change.
///
/// # Panics
///
/// Panics if the slot holds no block, if the block does not head a valid
/// block below the top order, or if the buddy is not free at
/// `source_order`.
fn merge_block(table: &mut FreeTable<'_>, slot: Slot, source_order: usize) -> Slot {
    assert!(
        source_order < MAX_ORDER - 1,
        "merge_block: order {} cannot be merged",
        source_order
    );
    let pfn = match table.block_at(slot) {
        Some(pfn) => pfn,
        None => panic!("merge_block: slot {:?} holds no block", slot),
    };
    let buddy = match buddy_of(pfn, source_order) {
        Some(buddy) => buddy,
        None => panic!(
            "merge_block: {:?} does not head an order {} block",
            pfn, source_order
        ),
    };

    table.remove(pfn, source_order);
    table.remove(buddy, source_order);

    table.insert(cmp::min(pfn, buddy), source_order + 1)
}

/// A buddy system allocator managing a fixed pool of page frames.
///
/// The allocator starts out empty; [`init`](BuddyAllocator::init) hands it
/// a descriptor pool whose indices are the frame numbers `0..len`. All
/// mutating operations take `&mut self`, so the borrow itself is the
/// exclusive access each operation needs for its full duration. Use a
/// [`LockedAllocator`](crate::LockedAllocator) to share one allocator
/// between contexts.
pub struct BuddyAllocator<'a> {
    table: Option<FreeTable<'a>>,
    stats: AllocStats,
}

impl<'a> BuddyAllocator<'a> {
    /// Creates a new, uninitialized allocator that manages no pages yet.
    pub const fn new() -> Self {
        BuddyAllocator {
            table: None,
            stats: AllocStats::with_name("Buddy Page Allocator"),
        }
    }

    /// Hands the allocator its page pool, one descriptor per frame.
    ///
    /// Every full top-order block in the pool becomes a free block. A
    /// trailing remainder smaller than one top-order block is dropped and
    /// will never be handed out. Returns the number of usable pages.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RegionTooSmall`] if not even one top-order block
    /// fits into the pool, and with [`Error::AlreadyInitialized`] if the
    /// allocator already has a pool.
    pub fn init(&mut self, pages: &'a mut [PageDescriptor]) -> Result<usize> {
        if self.table.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let block = pages_per_block(MAX_ORDER - 1);
        let blocks = pages.len() / block;
        if blocks == 0 {
            return Err(Error::RegionTooSmall);
        }

        let usable = blocks * block;
        let dropped = pages.len() - usable;

        let mut table = FreeTable::new(pages);
        for idx in 0..blocks {
            table.insert(Pfn::new(idx * block), MAX_ORDER - 1);
        }

        if dropped != 0 {
            warn!(
                "buddy: pool is not a multiple of {} pages, dropping {} trailing pages",
                block, dropped
            );
        }
        debug!(
            "buddy: managing {} pages as {} blocks of order {}",
            usable,
            blocks,
            MAX_ORDER - 1
        );

        self.stats.total = usable;
        self.stats.free = usable;
        self.table = Some(table);

        Ok(usable)
    }

    /// Allocates a block of `2^order` contiguous pages and returns the
    /// handle of its first page.
    ///
    /// The allocator always serves the lowest-address free block of the
    /// smallest sufficient order, splitting larger blocks on the way down,
    /// so equal-order requests come back in ascending address order.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OrderTooLarge`] if `order` is out of range, and
    /// with [`Error::NoMemoryAvailable`] if no free block of order `order`
    /// or above is left.
    pub fn alloc_pages(&mut self, order: usize) -> Result<Pfn> {
        if order >= MAX_ORDER {
            return Err(Error::OrderTooLarge);
        }
        let table = match self.table.as_mut() {
            Some(table) => table,
            None => return Err(Error::NoMemoryAvailable),
        };

        // Find the smallest order that still has a free block.
        let mut at = order;
        while table.head(at).is_none() {
            at += 1;
            if at == MAX_ORDER {
                return Err(Error::NoMemoryAvailable);
            }
        }

        // Split its head all the way down. Each split leaves the lower
        // half at the head of the next list, so the block handed out ends
        // up being the lowest-address fit.
        while at > order {
            split_block(table, Slot::Head(at), at);
            at -= 1;
        }

        let pfn = table
            .head(order)
            .expect("splitting down must leave a block at the requested order");
        table.remove(pfn, order);

        self.stats.allocated += pages_per_block(order);
        self.stats.free -= pages_per_block(order);

        Ok(pfn)
    }

    /// Gives a block back to the allocator and eagerly merges it with its
    /// buddy as far up as possible, so that no two free buddies ever stay
    /// split.
    ///
    /// The block must be exactly one previously handed out by
    /// [`alloc_pages`](BuddyAllocator::alloc_pages) at this `order`, or a
    /// page taken by [`reserve_page`](BuddyAllocator::reserve_page) with
    /// `order` 0.
    ///
    /// # Panics
    ///
    /// Violating the contract panics: `order` out of range, an allocator
    /// without a pool, a block reaching outside the usable pool, a head
    /// that is not aligned for `order`, or a head that is already free.
    pub fn free_pages(&mut self, pfn: Pfn, mut order: usize) {
        assert!(
            order < MAX_ORDER,
            "free_pages: order {} is out of range",
            order
        );
        let table = match self.table.as_mut() {
            Some(table) => table,
            None => panic!("free_pages: allocator has no page pool"),
        };
        assert!(
            pfn.number() + pages_per_block(order) <= self.stats.total,
            "free_pages: block {:?} of order {} is outside the managed pool",
            pfn,
            order
        );
        assert!(
            is_aligned(pfn, order),
            "free_pages: {:?} is not aligned for order {}",
            pfn,
            order
        );

        self.stats.free += pages_per_block(order);
        self.stats.allocated -= pages_per_block(order);

        let mut pfn = pfn;
        let mut slot = table.insert(pfn, order);

        // Merge with the buddy while one is free, moving up one order each
        // time. The merged block keeps the lower frame number of the pair.
        while order < MAX_ORDER - 1 {
            let buddy = buddy_of(pfn, order)
                .expect("a block below the top order always has a buddy");
            if table.slot_of(buddy, order).is_none() {
                break;
            }
            slot = merge_block(table, slot, order);
            pfn = cmp::min(pfn, buddy);
            order += 1;
        }
    }

    /// Removes one specific page from future allocation.
    ///
    /// The page may sit anywhere inside a free block of any order. The
    /// containing block is split down until the page is a lone order-0
    /// block, which is then taken out of the table. Give the page back
    /// with [`free_pages`](BuddyAllocator::free_pages) at order 0.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::PageNotFree`] if no free block contains the
    /// page, meaning it is already allocated or reserved, or outside the
    /// usable pool.
    pub fn reserve_page(&mut self, pfn: Pfn) -> Result<()> {
        let table = match self.table.as_mut() {
            Some(table) => table,
            None => return Err(Error::PageNotFree),
        };

        for order in 0..MAX_ORDER {
            let (mut slot, _) = match table.find_containing(pfn, order) {
                Some(found) => found,
                None => continue,
            };

            // Split towards the target: after each split, step into the
            // half that still contains it.
            let mut at = order;
            while at > 0 {
                let lower = split_block(table, slot, at);
                at -= 1;

                let upper = buddy_of(lower, at)
                    .expect("the lower half of a split block always has a buddy");
                let half = if pfn >= upper { upper } else { lower };
                slot = table
                    .slot_of(half, at)
                    .expect("split_block must leave both halves in the next list");
            }

            table.remove(pfn, 0);
            self.stats.allocated += 1;
            self.stats.free -= 1;

            return Ok(());
        }

        Err(Error::PageNotFree)
    }

    /// Logs the free-area table through [`log`], one `debug!` line per
    /// order listing the free block frame numbers in ascending order.
    pub fn dump_state(&self) {
        debug!("buddy allocator state:");
        if let Some(table) = self.table.as_ref() {
            for order in 0..MAX_ORDER {
                debug!("  [{:>2}]{}", order, table.display_order(order));
            }
        }
    }

    /// Iterates over the free blocks of one order in ascending frame-number
    /// order. The iterator is empty for out-of-range orders and for an
    /// allocator without a pool.
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = Pfn> + '_ {
        match self.table.as_ref() {
            Some(table) if order < MAX_ORDER => table.blocks(order),
            _ => Blocks::empty(),
        }
    }

    /// Returns a snapshot of the allocation statistics, counted in pages.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }
}

impl Default for BuddyAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}
