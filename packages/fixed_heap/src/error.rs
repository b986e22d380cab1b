use thiserror::Error;

/// Errors reported by [`HeapAllocator`][crate::HeapAllocator] operations.
///
/// None of these are fatal. The heap is left unchanged by any operation that returns an error.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// No free block is large enough to satisfy the request, either because the heap is
    /// exhausted or because free space is fragmented into smaller blocks.
    #[error("no free block can hold {requested} bytes")]
    OutOfMemory {
        /// The number of bytes the caller asked for.
        requested: usize,
    },

    /// The size of the request cannot be represented, e.g. because an element count
    /// multiplied by an element size overflows `usize`.
    #[error("requested size overflows usize")]
    SizeOverflow,

    /// The pointer does not refer to the start of a live allocation made by this heap.
    #[error("pointer does not refer to an allocation made by this heap")]
    InvalidPointer,

    /// The pointer refers to a block that has already been released.
    #[error("block was already released")]
    DoubleRelease,
}

/// A specialized `Result` type for heap operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
