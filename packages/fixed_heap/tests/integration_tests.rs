//! Integration tests for `fixed_heap`, exercising the public API the way a program that
//! replaces its general-purpose heap would.

use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::slice;

use fixed_heap::{BLOCK_ALIGN, Error, HEADER_SIZE, HeapAllocator, MisusePolicy, Region};

fn static_buffer(len: usize) -> &'static mut [MaybeUninit<u8>] {
    Box::leak(vec![MaybeUninit::uninit(); len].into_boxed_slice())
}

fn write_pattern(ptr: NonNull<u8>, len: usize, seed: u8) {
    for index in 0..len {
        let value = seed.wrapping_add(u8::try_from(index % 256).unwrap());

        // SAFETY: Callers only pass ranges within live allocations they own.
        unsafe {
            ptr.add(index).write(value);
        }
    }
}

fn has_pattern(ptr: NonNull<u8>, len: usize, seed: u8) -> bool {
    // SAFETY: Callers only pass ranges previously written by `write_pattern()`.
    let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), len) };

    bytes
        .iter()
        .enumerate()
        .all(|(index, byte)| *byte == seed.wrapping_add(u8::try_from(index % 256).unwrap()))
}

#[test]
fn heap_over_static_buffer() {
    let region = Region::from_static(static_buffer(8192));
    let heap = HeapAllocator::builder()
        .region(region)
        .declared_size(16 * 1024)
        .build();

    assert!(heap.capacity() <= 8192);
    assert!(heap.capacity() > 8192 - 2 * BLOCK_ALIGN);

    let ptr = heap.allocate(1000).unwrap();
    write_pattern(ptr, 1000, 7);
    assert!(has_pattern(ptr, 1000, 7));

    let stats = heap.stats();
    assert_eq!(stats.declared_size, 16 * 1024);
    assert_eq!(stats.capacity, heap.capacity());
}

#[test]
fn allocations_do_not_overlap() {
    let heap = HeapAllocator::new(64 * 1024);

    let live = (0..50_u8)
        .map(|seed| {
            let len = usize::from(seed) * 7 + 1;
            let ptr = heap.allocate(len).unwrap();
            write_pattern(ptr, len, seed);
            (ptr, len, seed)
        })
        .collect::<Vec<_>>();

    for (ptr, len, seed) in &live {
        assert!(has_pattern(*ptr, *len, *seed), "allocation {seed} was overwritten");
        assert!(heap.payload_size(ptr.as_ptr()).unwrap() >= *len);
    }

    for (ptr, _, _) in live {
        heap.release(ptr.as_ptr());
    }

    assert_eq!(heap.blocks().len(), 1);
}

#[test]
fn interleaved_release_keeps_heap_consistent() {
    let heap = HeapAllocator::new(16 * 1024);

    let mut live = (0..40)
        .map(|index| heap.allocate(16 + index * 8).unwrap())
        .collect::<Vec<_>>();

    // Release every other allocation, then the rest in reverse order.
    let odd = live
        .iter()
        .copied()
        .enumerate()
        .filter(|(index, _)| index % 2 == 1)
        .map(|(_, ptr)| ptr)
        .collect::<Vec<_>>();

    for ptr in &odd {
        heap.release(ptr.as_ptr());
    }

    live.retain(|ptr| !odd.contains(ptr));

    let blocks = heap.blocks();
    for pair in blocks.windows(2) {
        assert!(!(pair[0].is_free() && pair[1].is_free()));
    }

    let stats = heap.stats();
    assert_eq!(
        stats.allocated_bytes + stats.free_bytes + stats.header_overhead(),
        stats.capacity
    );

    for ptr in live.into_iter().rev() {
        heap.release(ptr.as_ptr());
    }

    let blocks = heap.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].size, heap.capacity() - HEADER_SIZE);
}

#[test]
fn growing_buffer_by_repeated_resize() {
    let heap = HeapAllocator::new(64 * 1024);

    let mut len = 8;
    let mut ptr = heap.allocate(len).unwrap();
    write_pattern(ptr, len, 42);

    while len < 8 * 1024 {
        let new_len = len * 2;
        ptr = heap.resize(ptr.as_ptr(), new_len).unwrap();

        assert!(has_pattern(ptr, len, 42), "contents lost growing to {new_len}");

        len = new_len;
        write_pattern(ptr, len, 42);
    }

    // Only the final buffer is still allocated.
    assert_eq!(heap.stats().allocated_bytes, len);

    heap.release(ptr.as_ptr());
    assert_eq!(heap.stats().free_blocks, 1);
}

#[test]
fn exhaustion_and_recovery() {
    let heap = HeapAllocator::new(4096);

    let mut live = Vec::new();

    loop {
        match heap.allocate(100) {
            Ok(ptr) => live.push(ptr),
            Err(Error::OutOfMemory { requested }) => {
                assert_eq!(requested, 100);
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(!live.is_empty());
    assert!(heap.stats().largest_free_block < 100);

    let freed = live.swap_remove(live.len() / 2);
    heap.release(freed.as_ptr());

    assert_eq!(heap.allocate(100).unwrap(), freed);
}

#[test]
fn misuse_is_reported_without_damage() {
    let heap = HeapAllocator::new(4096);
    let other = HeapAllocator::new(4096);

    let ptr = heap.allocate(64).unwrap();
    let foreign = other.allocate(64).unwrap();
    let before = heap.blocks();

    assert_eq!(heap.try_release(foreign.as_ptr()), Err(Error::InvalidPointer));
    assert_eq!(
        heap.try_release(ptr.as_ptr().wrapping_add(1)),
        Err(Error::InvalidPointer)
    );
    assert_eq!(heap.resize(foreign.as_ptr(), 8), Err(Error::InvalidPointer));
    assert_eq!(heap.payload_size(foreign.as_ptr()), None);
    assert_eq!(heap.blocks(), before);

    heap.release(ptr.as_ptr());
    assert_eq!(heap.try_release(ptr.as_ptr()), Err(Error::DoubleRelease));
}

#[test]
#[should_panic]
fn panic_policy_rejects_foreign_pointer() {
    let heap = HeapAllocator::builder()
        .capacity(4096)
        .misuse_policy(MisusePolicy::Panic)
        .build();

    let mut local = [0_u8; 16];
    heap.release(local.as_mut_ptr());
}

#[test]
fn error_messages_are_descriptive() {
    let heap = HeapAllocator::new(1024);

    let error = heap.allocate(1 << 20).unwrap_err();

    assert!(error.to_string().contains(&(1_usize << 20).to_string()));
}
