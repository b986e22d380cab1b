use std::fmt;

use crate::BlockState;

/// A point-in-time summary of how the memory of a heap is used.
///
/// Returned by [`HeapAllocator::stats()`][crate::HeapAllocator::stats]. The byte counts only
/// include block payloads; header overhead is reported separately, so that
/// `allocated_bytes + free_bytes + header_overhead() == capacity` always holds.
///
/// # Examples
///
/// ```
/// use fixed_heap::HeapAllocator;
///
/// let heap = HeapAllocator::new(1024);
/// let _ptr = heap.allocate(100).unwrap();
///
/// let stats = heap.stats();
/// assert!(stats.allocated_bytes >= 100);
/// assert_eq!(stats.block_count, 2);
/// assert_eq!(
///     stats.allocated_bytes + stats.free_bytes + stats.header_overhead(),
///     stats.capacity
/// );
///
/// println!("{stats}");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct HeapStats {
    /// Size of the managed region in bytes.
    pub capacity: usize,

    /// The heap size declared when the heap was created. Informational only.
    pub declared_size: usize,

    /// Sum of the payload sizes of all blocks in use.
    pub allocated_bytes: usize,

    /// Sum of the payload sizes of all free blocks.
    pub free_bytes: usize,

    /// Number of free blocks.
    pub free_blocks: usize,

    /// Payload size of the largest free block, or zero if there is none.
    pub largest_free_block: usize,

    /// Total number of blocks, free or in use.
    pub block_count: usize,

    /// Size of a single block header.
    pub header_size: usize,
}

impl HeapStats {
    /// Bytes taken up by block headers.
    #[must_use]
    #[inline]
    pub fn header_overhead(&self) -> usize {
        self.block_count
            .checked_mul(self.header_size)
            .expect("headers cannot take up more bytes than exist in the region")
    }
}

impl fmt::Display for HeapStats {
    #[cfg_attr(test, mutants::skip)] // Human-readable output, no behavior to verify.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Heap allocator statistics:")?;
        writeln!(f, "  capacity: {} bytes", self.capacity)?;
        writeln!(f, "  declared size: {} bytes", self.declared_size)?;
        writeln!(f, "  allocated: {} bytes", self.allocated_bytes)?;
        writeln!(f, "  free: {} bytes", self.free_bytes)?;
        writeln!(f, "  header overhead: {} bytes", self.header_overhead())?;
        writeln!(f, "  blocks: {}", self.block_count)?;
        writeln!(f, "  free blocks: {}", self.free_blocks)?;
        write!(f, "  largest free block: {} bytes", self.largest_free_block)
    }
}

/// Describes one block of a heap, as returned by
/// [`HeapAllocator::blocks()`][crate::HeapAllocator::blocks].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct BlockInfo {
    /// Byte offset of the block header from the start of the region.
    pub offset: usize,

    /// Payload size of the block, excluding the header.
    pub size: usize,

    /// Whether the block is free or in use.
    pub state: BlockState,
}

impl BlockInfo {
    /// Whether the block is available for allocation.
    #[must_use]
    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}
