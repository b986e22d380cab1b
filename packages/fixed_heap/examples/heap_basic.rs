//! Basic usage of the `fixed_heap` crate:
//!
//! * Creating a heap.
//! * Allocating, resizing and releasing memory.
//! * Inspecting the state of the heap.

use std::slice;

use fixed_heap::{Error, HeapAllocator};

fn main() {
    let heap = HeapAllocator::new(4096);

    let greeting = b"Hello from a fixed heap!";

    let ptr = heap.allocate(greeting.len()).unwrap();

    // SAFETY: The allocation has room for the whole greeting and nobody else is using it.
    unsafe {
        std::ptr::copy_nonoverlapping(greeting.as_ptr(), ptr.as_ptr(), greeting.len());
    }

    // Growing an allocation moves it, taking the contents along.
    let ptr = heap.resize(ptr.as_ptr(), 1024).unwrap();

    // SAFETY: The first bytes were copied over from the original allocation.
    let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), greeting.len()) };
    println!("Resized allocation contains: {}", String::from_utf8_lossy(bytes));

    println!("{}", heap.stats());

    // Running out of memory is an ordinary error.
    match heap.allocate(1024 * 1024) {
        Err(Error::OutOfMemory { requested }) => {
            println!("Could not allocate {requested} bytes, as expected");
        }
        other => println!("Unexpected result: {other:?}"),
    }

    heap.release(ptr.as_ptr());

    for block in heap.blocks() {
        println!(
            "Block at offset {} with {} bytes of payload, {:?}",
            block.offset, block.size, block.state
        );
    }
}
