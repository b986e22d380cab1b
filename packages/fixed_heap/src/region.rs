use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::{BLOCK_ALIGN, HEADER_SIZE};

/// The smallest region that can hold one block: a header plus a minimal payload.
pub const MIN_REGION_SIZE: usize = HEADER_SIZE + BLOCK_ALIGN;

/// A fixed-capacity span of memory that is exclusively owned by one heap.
///
/// A region is either allocated from the process allocator when created with
/// [`new()`][Self::new], or borrowed for the rest of the program from a caller-provided static
/// buffer via [`from_static()`][Self::from_static]. The latter is the typical choice for
/// environments that have no other allocator to draw from, such as early boot code.
///
/// The start of the region is always aligned to [`BLOCK_ALIGN`] and its length is always a
/// multiple of [`BLOCK_ALIGN`]. Bytes that do not fit these constraints are left unused.
///
/// The region never hands out references to its contents. All access goes through raw
/// pointers derived from [`base()`][Self::base].
///
/// # Examples
///
/// ```
/// use fixed_heap::{HeapAllocator, Region};
///
/// let region = Region::new(4096);
/// assert_eq!(region.len(), 4096);
///
/// let heap = HeapAllocator::with_region(region);
/// assert_eq!(heap.capacity(), 4096);
/// ```
pub struct Region {
    base: NonNull<u8>,
    len: usize,

    /// Present if the memory came from the process allocator and must be returned to it.
    allocated_layout: Option<Layout>,
}

impl Region {
    /// Allocates a new region of `capacity` bytes from the process allocator.
    ///
    /// The capacity is rounded down to a multiple of [`BLOCK_ALIGN`].
    ///
    /// # Panics
    ///
    /// Panics if the rounded capacity is less than [`MIN_REGION_SIZE`]. Allocation failure is
    /// handled by [`handle_alloc_error()`], which aborts the process by default.
    #[must_use]
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let len = align_down(capacity);

        assert!(
            len >= MIN_REGION_SIZE,
            "region capacity {capacity} is smaller than the minimum of {MIN_REGION_SIZE} bytes"
        );

        let layout = Layout::from_size_align(len, BLOCK_ALIGN)
            .expect("non-zero size with a power-of-two alignment is always a valid layout");

        // SAFETY: The layout has a non-zero size, guarded by the assertion above.
        let ptr = unsafe { alloc(layout) };

        let Some(base) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };

        Self {
            base,
            len,
            allocated_layout: Some(layout),
        }
    }

    /// Takes over a static buffer as the backing memory of a region.
    ///
    /// The buffer is exclusively owned by the region (and thus by the heap it is given to)
    /// from this point on. Leading bytes are skipped to align the start of the region and
    /// trailing bytes are skipped to make the length a multiple of [`BLOCK_ALIGN`].
    ///
    /// # Panics
    ///
    /// Panics if fewer than [`MIN_REGION_SIZE`] bytes remain after alignment.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use fixed_heap::{HeapAllocator, Region};
    ///
    /// let buffer: &'static mut [MaybeUninit<u8>] = Box::leak(Box::new([MaybeUninit::uninit(); 1024]));
    ///
    /// let heap = HeapAllocator::with_region(Region::from_static(buffer));
    /// assert!(heap.capacity() >= 1024 - 2 * fixed_heap::BLOCK_ALIGN);
    /// ```
    #[must_use]
    #[inline]
    pub fn from_static(buffer: &'static mut [MaybeUninit<u8>]) -> Self {
        let buffer_len = buffer.len();
        let skip = buffer.as_ptr().align_offset(BLOCK_ALIGN);

        let usable = buffer.get_mut(skip..).unwrap_or_default();
        let len = align_down(usable.len());

        assert!(
            len >= MIN_REGION_SIZE,
            "static buffer of {buffer_len} bytes leaves only {len} aligned bytes, less than the minimum of {MIN_REGION_SIZE}"
        );

        let base = NonNull::new(usable.as_mut_ptr().cast::<u8>())
            .expect("slice pointers are never null");

        Self {
            base,
            len,
            allocated_layout: None,
        }
    }

    /// Number of bytes in the region.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; a region is never smaller than [`MIN_REGION_SIZE`].
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte of the region.
    #[must_use]
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Whether `ptr` points into the region (base inclusive, limit exclusive).
    #[must_use]
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Byte offset of `ptr` from the base of the region, if it points into the region.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        ptr.addr()
            .checked_sub(self.base.addr().get())
            .filter(|offset| *offset < self.len)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("allocated", &self.allocated_layout.is_some())
            .finish()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(layout) = self.allocated_layout {
            // SAFETY: The pointer came from `alloc()` with this exact layout in `new()`.
            unsafe {
                dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

// SAFETY: The region exclusively owns its memory (allocated or taken over via `&'static mut`),
// so moving it to another thread moves that exclusive ownership along with it.
unsafe impl Send for Region {}

/// Rounds `value` down to a multiple of [`BLOCK_ALIGN`].
const fn align_down(value: usize) -> usize {
    value & !(BLOCK_ALIGN - 1)
}

/// Rounds `value` up to a multiple of [`BLOCK_ALIGN`], or `None` on overflow.
#[inline]
pub(crate) const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(BLOCK_ALIGN - 1) {
        Some(padded) => Some(align_down(padded)),
        None => None,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Region: Send);
    assert_not_impl_any!(Region: Sync);

    fn leak_buffer(len: usize) -> &'static mut [MaybeUninit<u8>] {
        Box::leak(vec![MaybeUninit::uninit(); len].into_boxed_slice())
    }

    #[test]
    fn new_rounds_down_to_alignment() {
        let region = Region::new(64 * BLOCK_ALIGN + BLOCK_ALIGN - 1);

        assert_eq!(region.len(), 64 * BLOCK_ALIGN);
        assert_eq!(region.base().addr().get() % BLOCK_ALIGN, 0);
        assert!(!region.is_empty());
    }

    #[test]
    #[should_panic]
    fn new_too_small_panics() {
        drop(Region::new(MIN_REGION_SIZE - 1));
    }

    #[test]
    fn minimum_size_is_accepted() {
        let region = Region::new(MIN_REGION_SIZE);
        assert_eq!(region.len(), MIN_REGION_SIZE);
    }

    #[test]
    fn from_static_aligns_start_and_length() {
        let buffer = leak_buffer(512);
        let buffer_start = buffer.as_ptr().addr();

        // Deliberately misalign the start by one byte.
        let misaligned = buffer.get_mut(1..).unwrap();
        let region = Region::from_static(misaligned);

        assert_eq!(region.base().addr().get() % BLOCK_ALIGN, 0);
        assert_eq!(region.len() % BLOCK_ALIGN, 0);
        assert!(region.base().addr().get() > buffer_start);
        assert!(region.len() <= 511);
        assert!(region.len() > 511 - 2 * BLOCK_ALIGN);
    }

    #[test]
    #[should_panic]
    fn from_static_too_small_panics() {
        drop(Region::from_static(leak_buffer(MIN_REGION_SIZE / 2)));
    }

    #[test]
    fn contains_respects_bounds() {
        let region = Region::new(256);
        let base = region.base().as_ptr();

        assert!(region.contains(base));
        assert!(region.contains(base.wrapping_add(255)));
        assert!(!region.contains(base.wrapping_add(256)));
        assert!(!region.contains(base.wrapping_sub(1)));
        assert!(!region.contains(std::ptr::null()));
    }

    #[test]
    fn align_up_rounds_and_detects_overflow() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(BLOCK_ALIGN));
        assert_eq!(align_up(BLOCK_ALIGN), Some(BLOCK_ALIGN));
        assert_eq!(align_up(BLOCK_ALIGN + 1), Some(2 * BLOCK_ALIGN));
        assert_eq!(align_up(usize::MAX), None);
    }
}
