//! The free-area table: one address-ordered, singly-linked list of free
//! block heads per order, linked through the page descriptors.

use crate::buddy::{pages_per_block, MAX_ORDER};
use crate::frame::{PageDescriptor, Pfn};
use core::fmt;

/// Identifies the link through which a block is reachable in its free list:
/// either the table head of an order, or the `next_free` link of the block
/// sitting right before it.
///
/// A slot stays valid until the list it points into is modified again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// The block is the first entry of this order's list.
    Head(usize),
    /// The block is linked behind this page.
    After(Pfn),
}

/// The only record of which blocks are free.
///
/// Every order holds the heads of its free blocks in strictly ascending
/// frame-number order. A block that is not reachable from `heads` counts as
/// allocated or reserved.
pub(crate) struct FreeTable<'a> {
    pages: &'a mut [PageDescriptor],
    heads: [Option<Pfn>; MAX_ORDER],
}

impl<'a> FreeTable<'a> {
    /// Creates an empty table over the given descriptor pool.
    pub fn new(pages: &'a mut [PageDescriptor]) -> Self {
        FreeTable {
            pages,
            heads: [None; MAX_ORDER],
        }
    }

    /// Returns the first free block of this order, which is also the one
    /// with the lowest frame number.
    pub fn head(&self, order: usize) -> Option<Pfn> {
        self.heads[order]
    }

    fn link(&self, pfn: Pfn) -> Option<Pfn> {
        self.pages[pfn.number()].next_free
    }

    /// Resolves a slot to the block it currently holds.
    pub fn block_at(&self, slot: Slot) -> Option<Pfn> {
        match slot {
            Slot::Head(order) => self.heads[order],
            Slot::After(prev) => self.link(prev),
        }
    }

    /// Inserts a block head into this order's list, keeping the list in
    /// ascending frame-number order, and returns the slot that now holds it.
    ///
    /// # Panics
    ///
    /// Panics if the page already heads a free block. Linking it a second
    /// time would alias two list entries onto one descriptor link.
    pub fn insert(&mut self, pfn: Pfn, order: usize) -> Slot {
        assert!(
            !self.pages[pfn.number()].free,
            "insert_block: page {:?} is already in a free list",
            pfn
        );

        // Walk to the first entry with a higher frame number, trailing one
        // entry behind it:
        //
        //  heads[o] --> a --> b --> d --> ...
        //                     ^
        //                    prev          (inserting c)
        let mut prev = None;
        let mut cur = self.heads[order];
        while let Some(next) = cur {
            if next.number() > pfn.number() {
                break;
            }
            prev = Some(next);
            cur = self.link(next);
        }

        self.pages[pfn.number()].next_free = cur;
        self.pages[pfn.number()].free = true;
        match prev {
            Some(prev) => {
                self.pages[prev.number()].next_free = Some(pfn);
                Slot::After(prev)
            }
            None => {
                self.heads[order] = Some(pfn);
                Slot::Head(order)
            }
        }
    }

    /// Unlinks a block head from this order's list.
    ///
    /// # Panics
    ///
    /// Panics if the block is not present in the list. Asking to remove a
    /// block the table does not hold means the caller's view of the table
    /// has diverged from its actual state, and carrying on would corrupt it.
    pub fn remove(&mut self, pfn: Pfn, order: usize) {
        let slot = match self.slot_of(pfn, order) {
            Some(slot) => slot,
            None => panic!(
                "remove_block: page {:?} is not in the order {} free list",
                pfn, order
            ),
        };

        let next = self.link(pfn);
        match slot {
            Slot::Head(order) => self.heads[order] = next,
            Slot::After(prev) => self.pages[prev.number()].next_free = next,
        }

        let page = &mut self.pages[pfn.number()];
        page.next_free = None;
        page.free = false;
    }

    /// Finds the slot through which a block is linked, if the block is in
    /// this order's list. The scan stops early once it has passed the
    /// block's frame number, since the list is kept in ascending order.
    pub fn slot_of(&self, pfn: Pfn, order: usize) -> Option<Slot> {
        let mut slot = Slot::Head(order);
        let mut cur = self.heads[order];
        while let Some(next) = cur {
            if next == pfn {
                return Some(slot);
            }
            if next.number() > pfn.number() {
                return None;
            }
            slot = Slot::After(next);
            cur = self.link(next);
        }
        None
    }

    /// Finds the block of this order whose page range contains `pfn`,
    /// returning the block together with the slot linking it.
    pub fn find_containing(&self, pfn: Pfn, order: usize) -> Option<(Slot, Pfn)> {
        let span = pages_per_block(order);
        let mut slot = Slot::Head(order);
        let mut cur = self.heads[order];
        while let Some(head) = cur {
            if head.number() > pfn.number() {
                return None;
            }
            if pfn.number() - head.number() < span {
                return Some((slot, head));
            }
            slot = Slot::After(head);
            cur = self.link(head);
        }
        None
    }

    /// Iterates over the free blocks of one order in ascending frame-number
    /// order.
    pub fn blocks(&self, order: usize) -> Blocks<'_> {
        Blocks {
            pages: &*self.pages,
            cur: self.heads[order],
        }
    }

    /// Returns an adapter that formats one order's free list as hex frame
    /// numbers.
    pub fn display_order(&self, order: usize) -> OrderList<'_> {
        OrderList {
            pages: &*self.pages,
            head: self.heads[order],
        }
    }
}

/// Iterator over the free blocks of a single order.
pub(crate) struct Blocks<'t> {
    pages: &'t [PageDescriptor],
    cur: Option<Pfn>,
}

impl Blocks<'_> {
    /// Returns an iterator over no blocks at all.
    pub fn empty() -> Self {
        Blocks {
            pages: &[],
            cur: None,
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Pfn;

    fn next(&mut self) -> Option<Pfn> {
        let pfn = self.cur?;
        self.cur = self.pages[pfn.number()].next_free;
        Some(pfn)
    }
}

/// Formats the free blocks of one order as space-separated hex frame
/// numbers, in ascending order.
pub(crate) struct OrderList<'t> {
    pages: &'t [PageDescriptor],
    head: Option<Pfn>,
}

impl fmt::Display for OrderList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks = Blocks {
            pages: self.pages,
            cur: self.head,
        };
        for pfn in blocks {
            write!(f, " {:#x}", pfn.number())?;
        }
        Ok(())
    }
}
