use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;

use tracing::{debug, info, trace};

use crate::region::align_up;
use crate::{
    BlockHeader, BlockInfo, BlockList, BlockState, Error, HEADER_SIZE, HeapAllocatorBuilder,
    HeapStats, MisusePolicy, ReentrantLock, Region, Result,
};

/// A first-fit heap allocator that manages a single fixed-capacity [`Region`].
///
/// The region is divided into blocks, each preceded by a small header. Allocation scans the
/// blocks in address order and hands out the first free block that is large enough, splitting
/// off the unused remainder as a new free block if it is big enough to be useful. Releasing a
/// block marks it free and merges it with any free neighbors.
///
/// All operations take `&self` and are serialized by an internal [`ReentrantLock`], so the
/// heap can be shared between threads.
///
/// Payload pointers are aligned to [`BLOCK_ALIGN`][crate::BLOCK_ALIGN] and payload sizes are
/// rounded up to a multiple of it. The heap never reads or writes payload bytes except when
/// asked to (zeroing in [`zero_allocate()`][Self::zero_allocate], copying in
/// [`resize()`][Self::resize]).
///
/// # Examples
///
/// ```
/// use fixed_heap::HeapAllocator;
///
/// let heap = HeapAllocator::new(4096);
///
/// let ptr = heap.allocate(64).unwrap();
///
/// // SAFETY: The allocation is at least 64 bytes long and nobody else uses it.
/// unsafe {
///     ptr.write_bytes(0x42, 64);
/// }
///
/// let ptr = heap.resize(ptr.as_ptr(), 256).unwrap();
///
/// // SAFETY: Resizing preserves the original contents.
/// assert_eq!(unsafe { ptr.read() }, 0x42);
///
/// heap.release(ptr.as_ptr());
/// assert_eq!(heap.stats().allocated_bytes, 0);
/// ```
///
/// # Thread safety
///
/// The heap is thread-safe ([`Send`] and [`Sync`]). Every operation is atomic with respect to
/// every other operation, including the composite ones ([`resize()`][Self::resize] and
/// [`zero_allocate()`][Self::zero_allocate]).
pub struct HeapAllocator {
    /// All access to the block list must happen while holding `lock`.
    blocks: BlockList,
    lock: ReentrantLock,

    declared_size: usize,
    misuse_policy: MisusePolicy,
}

impl HeapAllocator {
    /// Creates a heap backed by a newly allocated region of `capacity` bytes.
    ///
    /// Use [`builder()`][Self::builder] to customize the heap.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is less than [`MIN_REGION_SIZE`][crate::MIN_REGION_SIZE].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::HeapAllocator;
    ///
    /// let heap = HeapAllocator::new(64 * 1024);
    /// assert_eq!(heap.capacity(), 64 * 1024);
    /// ```
    #[must_use]
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Creates a heap that manages the given region.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::{HeapAllocator, Region};
    ///
    /// let heap = HeapAllocator::with_region(Region::new(1024));
    /// assert_eq!(heap.capacity(), 1024);
    /// ```
    #[must_use]
    #[inline]
    pub fn with_region(region: Region) -> Self {
        Self::builder().region(region).build()
    }

    /// Creates a builder for configuring a new heap.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::{HeapAllocator, MisusePolicy};
    ///
    /// let heap = HeapAllocator::builder()
    ///     .capacity(4096)
    ///     .declared_size(8192)
    ///     .misuse_policy(MisusePolicy::Ignore)
    ///     .build();
    ///
    /// assert_eq!(heap.stats().declared_size, 8192);
    /// ```
    #[inline]
    pub fn builder() -> HeapAllocatorBuilder {
        HeapAllocatorBuilder::new()
    }

    pub(crate) fn new_inner(
        region: Region,
        declared_size: Option<usize>,
        misuse_policy: MisusePolicy,
    ) -> Self {
        let declared_size = declared_size.unwrap_or(region.len());

        debug!(
            capacity = region.len(),
            declared_size, "creating heap allocator"
        );

        Self {
            blocks: BlockList::new(region),
            lock: ReentrantLock::new(),
            declared_size,
            misuse_policy,
        }
    }

    /// Size of the managed region in bytes, including space taken up by block headers.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.blocks.region().len()
    }

    /// Whether `ptr` points into the payload area of the managed region.
    ///
    /// This is a bounds check only. It does not tell whether `ptr` is a live allocation.
    #[must_use]
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.blocks
            .region()
            .offset_of(ptr)
            .is_some_and(|offset| offset >= HEADER_SIZE)
    }

    /// Allocates a block with room for at least `size` bytes.
    ///
    /// The first free block (in address order) that is large enough is used. If the block is
    /// considerably larger than needed, the rest of it is split off as a new free block.
    ///
    /// The returned memory is uninitialized. A request for zero bytes is treated as a request
    /// for one byte, so every successful call returns a distinct pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if no free block is large enough and
    /// [`Error::SizeOverflow`] if `size` is so large that it cannot be rounded up to the
    /// block alignment.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::{Error, HeapAllocator};
    ///
    /// let heap = HeapAllocator::new(1024);
    ///
    /// assert!(heap.allocate(100).is_ok());
    /// assert_eq!(
    ///     heap.allocate(1_000_000),
    ///     Err(Error::OutOfMemory {
    ///         requested: 1_000_000
    ///     })
    /// );
    /// ```
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let _guard = self.lock.lock_guard();

        let payload_size = align_up(size.max(1)).ok_or(Error::SizeOverflow)?;

        let Some(offset) = self.first_fit(payload_size) else {
            debug!(requested = size, "no free block can satisfy allocation");
            return Err(Error::OutOfMemory { requested: size });
        };

        self.carve(offset, payload_size);
        self.coalesce();

        #[cfg(debug_assertions)]
        self.integrity_check();

        trace!(offset, requested = size, payload_size, "allocated block");

        Ok(self.blocks.payload_ptr(offset))
    }

    /// Allocates room for `count` elements of `element_size` bytes each and sets every
    /// requested byte to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if `count * element_size` overflows `usize` and
    /// [`Error::OutOfMemory`] if no free block is large enough.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::HeapAllocator;
    ///
    /// let heap = HeapAllocator::new(1024);
    /// let ptr = heap.zero_allocate(10, 4).unwrap();
    ///
    /// // SAFETY: The 40 bytes were zeroed by the heap.
    /// let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 40) };
    /// assert!(bytes.iter().all(|b| *b == 0));
    /// ```
    pub fn zero_allocate(&self, count: usize, element_size: usize) -> Result<NonNull<u8>> {
        let size = count
            .checked_mul(element_size)
            .ok_or(Error::SizeOverflow)?;

        // Held across the nested allocation so nobody sees the block before it is zeroed.
        let _guard = self.lock.lock_guard();

        let ptr = self.allocate(size)?;
        let offset = self
            .blocks
            .find_by_payload(ptr.as_ptr())
            .expect("we just allocated this block while holding the lock");

        self.blocks.fill_payload(offset, size, 0);

        Ok(ptr)
    }

    /// Changes the size of an allocation, moving it if necessary.
    ///
    /// * If `ptr` is null, this is the same as [`allocate(new_size)`][Self::allocate].
    /// * If the existing block is already large enough, `ptr` is returned unchanged. Blocks are
    ///   never shrunk.
    /// * Otherwise a new block is allocated, the entire payload of the old block is copied into
    ///   it and the old block is released.
    ///
    /// The whole operation is atomic with respect to other threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if `ptr` is neither null nor a live allocation of this
    /// heap. Returns [`Error::OutOfMemory`] or [`Error::SizeOverflow`] if a new block is needed
    /// but cannot be allocated, in which case the original allocation is left untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::HeapAllocator;
    ///
    /// let heap = HeapAllocator::new(1024);
    ///
    /// let small = heap.allocate(16).unwrap();
    /// let same = heap.resize(small.as_ptr(), 8).unwrap();
    /// assert_eq!(small, same);
    ///
    /// let large = heap.resize(small.as_ptr(), 512).unwrap();
    /// assert_ne!(small, large);
    /// ```
    pub fn resize(&self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>> {
        let Some(ptr) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };

        let _guard = self.lock.lock_guard();

        let old_offset = self
            .blocks
            .find_by_payload(ptr.as_ptr())
            .filter(|offset| !self.blocks.header(*offset).is_free())
            .ok_or(Error::InvalidPointer)?;

        let old_size = self.blocks.header(old_offset).size;

        if old_size >= new_size {
            return Ok(ptr);
        }

        let new_ptr = self.allocate(new_size)?;
        let new_offset = self
            .blocks
            .find_by_payload(new_ptr.as_ptr())
            .expect("we just allocated this block while holding the lock");

        self.blocks.copy_payload(old_offset, new_offset, old_size);

        self.try_release(ptr.as_ptr())
            .expect("we verified above that this block is live while holding the lock");

        trace!(old_offset, new_offset, new_size, "moved block on resize");

        Ok(new_ptr)
    }

    /// Releases an allocation so its memory can be reused.
    ///
    /// Does nothing if `ptr` is null. If `ptr` is not a live allocation of this heap, the heap
    /// is left unchanged and the [misuse policy][MisusePolicy] decides what happens next.
    /// The default is to ignore such calls.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not a live allocation and the misuse policy is
    /// [`MisusePolicy::Panic`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::HeapAllocator;
    ///
    /// let heap = HeapAllocator::new(1024);
    /// let ptr = heap.allocate(100).unwrap();
    ///
    /// heap.release(ptr.as_ptr());
    ///
    /// // Releasing twice or releasing null is silently ignored by default.
    /// heap.release(ptr.as_ptr());
    /// heap.release(std::ptr::null_mut());
    /// ```
    pub fn release(&self, ptr: *mut u8) {
        let Err(error) = self.try_release(ptr) else {
            return;
        };

        match self.misuse_policy {
            MisusePolicy::Ignore => {
                debug!(?ptr, %error, "ignoring invalid release");
            }
            MisusePolicy::Panic => {
                panic!("invalid release of {ptr:?}: {error}");
            }
        }
    }

    /// Releases an allocation so its memory can be reused, reporting invalid pointers.
    ///
    /// Releasing null succeeds and does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if `ptr` is not the start of a block of this heap and
    /// [`Error::DoubleRelease`] if the block has already been released. The heap is unchanged
    /// in both cases.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::{Error, HeapAllocator};
    ///
    /// let heap = HeapAllocator::new(1024);
    /// let ptr = heap.allocate(100).unwrap();
    ///
    /// assert_eq!(heap.try_release(ptr.as_ptr()), Ok(()));
    /// assert_eq!(heap.try_release(ptr.as_ptr()), Err(Error::DoubleRelease));
    /// ```
    pub fn try_release(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }

        let _guard = self.lock.lock_guard();

        if !self.contains(ptr) {
            return Err(Error::InvalidPointer);
        }

        let offset = self
            .blocks
            .find_by_payload(ptr)
            .ok_or(Error::InvalidPointer)?;

        let mut header = self.blocks.header(offset);

        if header.is_free() {
            return Err(Error::DoubleRelease);
        }

        header.state = BlockState::Free;
        self.blocks.set_header(offset, header);

        self.coalesce();

        #[cfg(debug_assertions)]
        self.integrity_check();

        trace!(offset, size = header.size, "released block");

        Ok(())
    }

    /// Usable size of a live allocation, which may exceed the size originally requested.
    ///
    /// Returns `None` if `ptr` is not a live allocation of this heap.
    #[must_use]
    pub fn payload_size(&self, ptr: *const u8) -> Option<usize> {
        let _guard = self.lock.lock_guard();

        self.blocks
            .find_by_payload(ptr)
            .map(|offset| self.blocks.header(offset))
            .filter(|header| !header.is_free())
            .map(|header| header.size)
    }

    /// Summarizes how the memory of the heap is used.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let _guard = self.lock.lock_guard();

        let mut stats = HeapStats {
            capacity: self.capacity(),
            declared_size: self.declared_size,
            allocated_bytes: 0,
            free_bytes: 0,
            free_blocks: 0,
            largest_free_block: 0,
            block_count: 0,
            header_size: HEADER_SIZE,
        };

        // None of the sums can overflow: they are bounded by the region size.
        for (_, header) in self.blocks.iter() {
            stats.block_count = stats.block_count.wrapping_add(1);

            if header.is_free() {
                stats.free_bytes = stats.free_bytes.wrapping_add(header.size);
                stats.free_blocks = stats.free_blocks.wrapping_add(1);
                stats.largest_free_block = stats.largest_free_block.max(header.size);
            } else {
                stats.allocated_bytes = stats.allocated_bytes.wrapping_add(header.size);
            }
        }

        stats
    }

    /// Emits the current [statistics][Self::stats] as an info-level log event.
    #[cfg_attr(test, mutants::skip)] // Logging only, no behavior to verify.
    pub fn log_stats(&self) {
        let stats = self.stats();

        info!(
            capacity = stats.capacity,
            declared_size = stats.declared_size,
            allocated_bytes = stats.allocated_bytes,
            free_bytes = stats.free_bytes,
            free_blocks = stats.free_blocks,
            largest_free_block = stats.largest_free_block,
            block_count = stats.block_count,
            "heap allocator statistics"
        );
    }

    /// Lists every block of the heap in address order.
    ///
    /// Intended for diagnostics. The result is a snapshot that may be outdated as soon as it
    /// is returned if other threads use the heap.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixed_heap::HeapAllocator;
    ///
    /// let heap = HeapAllocator::new(1024);
    /// let _a = heap.allocate(100).unwrap();
    ///
    /// let blocks = heap.blocks();
    /// assert_eq!(blocks.len(), 2);
    /// assert!(!blocks[0].is_free());
    /// assert!(blocks[1].is_free());
    /// ```
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let _guard = self.lock.lock_guard();

        self.blocks
            .iter()
            .map(|(offset, header)| BlockInfo {
                offset,
                size: header.size,
                state: header.state,
            })
            .collect()
    }

    /// Offset of the first free block with a payload of at least `payload_size` bytes.
    fn first_fit(&self, payload_size: usize) -> Option<usize> {
        self.blocks
            .iter()
            .find(|(_, header)| header.is_free() && header.size >= payload_size)
            .map(|(offset, _)| offset)
    }

    /// Marks the free block at `offset` as in use, splitting off the tail as a new free block
    /// if more than one header's worth of space would be left over.
    fn carve(&self, offset: usize, payload_size: usize) {
        let header = self.blocks.header(offset);

        let leftover = header
            .size
            .checked_sub(payload_size)
            .expect("first fit only selects blocks that are large enough");

        let mut allocated = BlockHeader {
            state: BlockState::InUse,
            ..header
        };

        // A remainder of exactly one header would leave a free block with an empty payload.
        if leftover > HEADER_SIZE {
            let remainder_offset = offset
                .checked_add(HEADER_SIZE)
                .and_then(|end| end.checked_add(payload_size))
                .expect("the remainder lies within the block, which lies within the region");

            self.blocks.set_header(
                remainder_offset,
                BlockHeader {
                    size: leftover.wrapping_sub(HEADER_SIZE),
                    next: header.next,
                    state: BlockState::Free,
                },
            );

            allocated.size = payload_size;
            allocated.next = NonZero::new(remainder_offset);
        }

        self.blocks.set_header(offset, allocated);
    }

    /// Merges every run of adjacent free blocks into the first block of the run.
    fn coalesce(&self) {
        let mut cursor = Some(0);

        while let Some(offset) = cursor {
            let mut header = self.blocks.header(offset);

            let Some(next_offset) = header.next_offset() else {
                break;
            };

            let next = self.blocks.header(next_offset);

            if header.is_free() && next.is_free() {
                header.size = header
                    .size
                    .checked_add(HEADER_SIZE)
                    .and_then(|size| size.checked_add(next.size))
                    .expect("merged block cannot exceed the region size");
                header.next = next.next;
                self.blocks.set_header(offset, header);

                // Stay on the same block, it may absorb the new neighbor, too.
                continue;
            }

            cursor = Some(next_offset);
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self) {
        let capacity = self.capacity();
        let mut expected_offset = 0_usize;
        let mut previous_was_free = false;

        for (offset, header) in self.blocks.iter() {
            assert_eq!(
                offset, expected_offset,
                "block at {offset} does not start where the previous block ends"
            );
            assert_eq!(
                header.size % crate::BLOCK_ALIGN,
                0,
                "block at {offset} has unaligned size {}",
                header.size
            );
            assert!(
                !(previous_was_free && header.is_free()),
                "block at {offset} is free and so is its predecessor"
            );

            expected_offset = offset
                .checked_add(HEADER_SIZE)
                .and_then(|end| end.checked_add(header.size))
                .expect("block end cannot overflow");

            match header.next_offset() {
                Some(next) => assert_eq!(
                    next, expected_offset,
                    "block at {offset} links to {next} instead of its physical neighbor"
                ),
                None => assert_eq!(
                    expected_offset, capacity,
                    "last block at {offset} ends at {expected_offset} instead of the region end"
                ),
            }

            previous_was_free = header.is_free();
        }
    }
}

impl fmt::Debug for HeapAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("region", self.blocks.region())
            .field("declared_size", &self.declared_size)
            .field("misuse_policy", &self.misuse_policy)
            .finish_non_exhaustive()
    }
}

// SAFETY: The block list is only accessed while holding the reentrant lock, which serializes
// all access across threads. Payload memory handed out to callers is theirs to synchronize.
unsafe impl Sync for HeapAllocator {}
