//! Block headers embedded in the managed region, and the raw memory access that goes with them.
//!
//! This is the only module that reads or writes region memory. Everything above it works with
//! byte offsets and copies of headers, never with references into the region.

use std::fmt;
use std::num::NonZero;
use std::ptr::{self, NonNull};

use crate::Region;

/// Size in bytes of the header that precedes every block payload in the region.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Alignment of every block header and every payload handed out by a heap.
///
/// Payload sizes are rounded up to a multiple of this value, so that the header of the
/// following block is also aligned.
pub const BLOCK_ALIGN: usize = align_of::<BlockHeader>();

/// Whether a block is available for allocation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
#[non_exhaustive]
pub enum BlockState {
    /// The block can be handed out by the next allocation that fits.
    Free,

    /// The block has been handed out and not yet released.
    InUse,
}

/// The bookkeeping record at the start of every block.
///
/// `next` is the byte offset of the following header. The first header always lives at
/// offset 0, so a successor offset can never be zero and `Option<NonZero>` costs nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) size: usize,
    pub(crate) next: Option<NonZero<usize>>,
    pub(crate) state: BlockState,
}

impl BlockHeader {
    pub(crate) fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    pub(crate) fn next_offset(&self) -> Option<usize> {
        self.next.map(NonZero::get)
    }
}

/// The intrusive list of blocks covering a [`Region`].
///
/// Headers are read and written by value through raw pointers, so methods only need `&self`.
/// The type is not `Sync`: the owning heap is responsible for serializing every access, which
/// is what makes the unsynchronized raw writes sound.
pub(crate) struct BlockList {
    region: Region,
}

impl BlockList {
    /// Takes over the region and writes a single free block covering all of it.
    pub(crate) fn new(region: Region) -> Self {
        let size = region
            .len()
            .checked_sub(HEADER_SIZE)
            .expect("regions are never smaller than one header plus payload");

        let list = Self { region };

        list.set_header(
            0,
            BlockHeader {
                size,
                next: None,
                state: BlockState::Free,
            },
        );

        list
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Returns a copy of the header at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the offset is misaligned or a header at that offset would not fit in the region.
    /// Callers must only pass offsets of headers previously written through this list.
    pub(crate) fn header(&self, offset: usize) -> BlockHeader {
        let ptr = self.header_ptr(offset);

        // SAFETY: `header_ptr()` guarantees an aligned pointer with room for a header, and every
        // offset we are asked about was previously initialized via `set_header()` because
        // offsets only ever come from walking the list that this type maintains.
        unsafe { ptr.read() }
    }

    /// Overwrites the header at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the offset is misaligned or a header at that offset would not fit in the region.
    pub(crate) fn set_header(&self, offset: usize, header: BlockHeader) {
        let ptr = self.header_ptr(offset);

        // SAFETY: `header_ptr()` guarantees an aligned pointer with room for a header. Nobody
        // holds a reference into the region, so writing through the pointer cannot alias one.
        unsafe {
            ptr.write(header);
        }
    }

    /// Address of the payload of the block whose header is at `offset`.
    pub(crate) fn payload_ptr(&self, offset: usize) -> NonNull<u8> {
        let header_ptr = self.header_ptr(offset);

        // SAFETY: A header fits at `offset` (checked by `header_ptr()`), so one past the header
        // is at most one past the end of the region, which is a valid pointer to compute.
        unsafe { header_ptr.add(1).cast::<u8>() }
    }

    /// Header offset of the block whose payload starts exactly at `ptr`, if any.
    ///
    /// Walks the list, so only offsets of real headers are ever returned.
    pub(crate) fn find_by_payload(&self, ptr: *const u8) -> Option<usize> {
        let header_offset = self.region.offset_of(ptr)?.checked_sub(HEADER_SIZE)?;

        self.iter()
            .map(|(offset, _)| offset)
            .take_while(|offset| *offset <= header_offset)
            .find(|offset| *offset == header_offset)
    }

    /// Copies `len` bytes from the payload of one block to the payload of another.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the payload size of either block or if the blocks are the same.
    pub(crate) fn copy_payload(&self, from_offset: usize, to_offset: usize, len: usize) {
        assert!(
            len <= self.header(from_offset).size && len <= self.header(to_offset).size,
            "payload copy of {len} bytes exceeds the source or destination block"
        );
        assert_ne!(from_offset, to_offset, "cannot copy a payload onto itself");

        let from = self.payload_ptr(from_offset);
        let to = self.payload_ptr(to_offset);

        // SAFETY: Both ranges lie within their own block payloads (asserted above) and distinct
        // blocks never overlap. Copying possibly uninitialized bytes is fine, as we never
        // interpret them.
        unsafe {
            ptr::copy_nonoverlapping(from.as_ptr(), to.as_ptr(), len);
        }
    }

    /// Sets the first `len` bytes of a block's payload to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the payload size of the block.
    pub(crate) fn fill_payload(&self, offset: usize, len: usize, value: u8) {
        assert!(
            len <= self.header(offset).size,
            "payload fill of {len} bytes exceeds the block"
        );

        let payload = self.payload_ptr(offset);

        // SAFETY: The range lies within the block payload (asserted above).
        unsafe {
            payload.write_bytes(value, len);
        }
    }

    /// Iterates over `(offset, header)` pairs in address order.
    pub(crate) fn iter(&self) -> Blocks<'_> {
        Blocks {
            list: self,
            next: Some(0),
        }
    }

    fn header_ptr(&self, offset: usize) -> NonNull<BlockHeader> {
        assert!(
            offset % BLOCK_ALIGN == 0,
            "block header offset {offset} is not aligned to {BLOCK_ALIGN}"
        );
        assert!(
            offset
                .checked_add(HEADER_SIZE)
                .is_some_and(|end| end <= self.region.len()),
            "block header offset {offset} is out of bounds of a region of {} bytes",
            self.region.len()
        );

        // SAFETY: Guarded by the bounds check above. The region base is aligned to
        // BLOCK_ALIGN and so is the offset, so the result is aligned for a header.
        unsafe { self.region.base().add(offset).cast::<BlockHeader>() }
    }
}

impl fmt::Debug for BlockList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockList")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Iterator over the blocks of a [`BlockList`], returned by [`BlockList::iter()`].
#[derive(Debug)]
pub(crate) struct Blocks<'a> {
    list: &'a BlockList,
    next: Option<usize>,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next?;
        let header = self.list.header(offset);

        self.next = header.next_offset();

        Some((offset, header))
    }
}
