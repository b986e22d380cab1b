#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A first-fit heap allocator over a single fixed-capacity memory region, for environments
//! where a general-purpose heap is unavailable or undesirable.
//!
//! This crate provides [`HeapAllocator`], which carves allocations out of a [`Region`] of
//! memory that it exclusively owns. The region is either allocated up front or taken over from
//! a caller-provided static buffer. Once created, the heap never asks anyone for more memory.
//!
//! The heap is thread-safe. Every operation is serialized by a [`ReentrantLock`], which is
//! itself built on a [`SpinLock`]. Both locks are public and can be used on their own.
//!
//! # Key features
//!
//! - **Fixed footprint**: all bookkeeping lives inside the managed region, as a header in
//!   front of every block.
//! - **First-fit allocation**: blocks are scanned in address order and oversized blocks are
//!   split so the remainder stays available.
//! - **Coalescing**: adjacent free blocks are merged as soon as a block is released.
//! - **Defensive release**: releasing null, foreign or already released pointers never
//!   corrupts the heap. [`try_release()`][HeapAllocator::try_release] reports such misuse as an
//!   [`Error`] and [`MisusePolicy`] decides how [`release()`][HeapAllocator::release] reacts.
//! - **Diagnostics**: [`stats()`][HeapAllocator::stats] and [`blocks()`][HeapAllocator::blocks]
//!   describe the state of the heap.
//!
//! # Example
//!
//! ```
//! use fixed_heap::{Error, HeapAllocator};
//!
//! let heap = HeapAllocator::new(1024);
//!
//! let a = heap.allocate(100).unwrap();
//! let b = heap.allocate(200).unwrap();
//!
//! heap.release(a.as_ptr());
//!
//! // First fit: the freed block at the start of the region is reused.
//! let c = heap.allocate(50).unwrap();
//! assert_eq!(a, c);
//!
//! // Exhaustion is a normal outcome, not a panic.
//! assert!(matches!(
//!     heap.allocate(4096),
//!     Err(Error::OutOfMemory { .. })
//! ));
//!
//! heap.release(b.as_ptr());
//! heap.release(c.as_ptr());
//! assert_eq!(heap.stats().free_blocks, 1);
//! ```
//!
//! # Memory layout
//!
//! Every block consists of a [`HEADER_SIZE`]-byte header followed by its payload. Payloads are
//! aligned to [`BLOCK_ALIGN`] and their sizes are rounded up to a multiple of it, so a heap of
//! capacity `C` can hold at most `C - HEADER_SIZE` bytes of payload in a single allocation.

mod block;
mod builder;
mod error;
mod heap;
mod misuse_policy;
mod reentrant_lock;
mod region;
mod spin_lock;
mod stats;

pub use block::{BLOCK_ALIGN, BlockState, HEADER_SIZE};
pub(crate) use block::{BlockHeader, BlockList};
pub use builder::*;
pub use error::*;
pub use heap::*;
pub use misuse_policy::*;
pub use reentrant_lock::*;
pub use region::{MIN_REGION_SIZE, Region};
pub use spin_lock::*;
pub use stats::*;
