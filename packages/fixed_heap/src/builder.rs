use std::cell::Cell;
use std::marker::PhantomData;

use crate::{HeapAllocator, MisusePolicy, Region};

/// Builder for creating an instance of [`HeapAllocator`].
///
/// The backing memory is mandatory and is specified either as a [`capacity()`][Self::capacity]
/// for a newly allocated region or as an existing [`region()`][Self::region]. Whichever is set
/// last wins. Other settings are optional.
///
/// # Examples
///
/// ```
/// use fixed_heap::{HeapAllocator, MisusePolicy, Region};
///
/// let heap = HeapAllocator::builder()
///     .region(Region::new(2048))
///     .misuse_policy(MisusePolicy::Panic)
///     .build();
///
/// assert_eq!(heap.capacity(), 2048);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct HeapAllocatorBuilder {
    backing: Option<Backing>,
    declared_size: Option<usize>,
    misuse_policy: MisusePolicy,

    _not_sync: PhantomData<Cell<()>>,
}

#[derive(Debug)]
enum Backing {
    Capacity(usize),
    Region(Region),
}

impl HeapAllocatorBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            backing: None,
            declared_size: None,
            misuse_policy: MisusePolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Backs the heap with a newly allocated region of `capacity` bytes.
    ///
    /// The capacity is rounded down to a multiple of [`BLOCK_ALIGN`][crate::BLOCK_ALIGN].
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.backing = Some(Backing::Capacity(capacity));
        self
    }

    /// Backs the heap with an existing region, which the heap takes ownership of.
    #[inline]
    pub fn region(mut self, region: Region) -> Self {
        self.backing = Some(Backing::Region(region));
        self
    }

    /// Sets the heap size reported in [statistics][crate::HeapStats::declared_size].
    ///
    /// This value is bookkeeping only and does not affect how much memory the heap manages.
    /// Defaults to the size of the region.
    #[inline]
    pub fn declared_size(mut self, declared_size: usize) -> Self {
        self.declared_size = Some(declared_size);
        self
    }

    /// Sets the [misuse policy][MisusePolicy], which governs how invalid calls to
    /// [`HeapAllocator::release()`] are treated.
    #[inline]
    pub fn misuse_policy(mut self, policy: MisusePolicy) -> Self {
        self.misuse_policy = policy;
        self
    }

    /// Builds the heap with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if neither [`capacity()`][Self::capacity] nor [`region()`][Self::region] has
    /// been called, or if the capacity is less than [`MIN_REGION_SIZE`][crate::MIN_REGION_SIZE].
    #[must_use]
    #[inline]
    pub fn build(self) -> HeapAllocator {
        let region = match self
            .backing
            .expect("backing memory must be set using .capacity() or .region() before calling .build()")
        {
            Backing::Capacity(capacity) => Region::new(capacity),
            Backing::Region(region) => region,
        };

        HeapAllocator::new_inner(region, self.declared_size, self.misuse_policy)
    }
}
