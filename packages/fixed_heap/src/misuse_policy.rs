/// Determines how [`HeapAllocator::release()`][crate::HeapAllocator::release] treats
/// pointers that cannot be released.
///
/// Such pointers are either foreign to the heap or refer to blocks that were already released.
/// The heap is never modified by such a call, regardless of policy. Callers that want to see
/// these conditions as values should use
/// [`HeapAllocator::try_release()`][crate::HeapAllocator::try_release] instead.
///
/// # Examples
///
/// ```
/// use fixed_heap::{HeapAllocator, MisusePolicy};
///
/// let heap = HeapAllocator::builder()
///     .capacity(1024)
///     .misuse_policy(MisusePolicy::Panic)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum MisusePolicy {
    /// Invalid releases are ignored after emitting a debug-level log event. This is the default.
    #[default]
    Ignore,

    /// Invalid releases panic.
    ///
    /// This may be valuable during development to locate the code responsible for the misuse.
    Panic,
}
