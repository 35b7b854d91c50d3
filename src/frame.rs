//! Page frames and their descriptors.

use core::fmt;

/// A page frame number: the dense index of one page inside the managed pool.
///
/// Frame numbers start at zero and directly index the descriptor slice the
/// allocator was initialized with. They are the stable identity of a page,
/// and all block arithmetic happens on them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pfn(usize);

impl Pfn {
    /// Returns the handle for the page with the given frame number.
    pub const fn new(number: usize) -> Self {
        Pfn(number)
    }

    /// Returns the frame number of this page.
    pub const fn number(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x})", self.0)
    }
}

/// Bookkeeping for a single page frame.
///
/// The allocator borrows a contiguous slice of descriptors, one per frame,
/// for its whole lifetime. A descriptor only carries free-list state: the
/// intrusive link to the next free block head, and a flag telling whether
/// this page heads a free block at all. Pages that are allocated, reserved,
/// or covered by a larger free block have a detached descriptor.
#[derive(Debug, Clone, Default)]
pub struct PageDescriptor {
    pub(crate) next_free: Option<Pfn>,
    pub(crate) free: bool,
}

impl PageDescriptor {
    /// Returns a descriptor for a page that is not part of any free list.
    pub const fn new() -> Self {
        PageDescriptor {
            next_free: None,
            free: false,
        }
    }
}
