//! Running a heap over a buffer that the program itself provides, the way code without any
//! other allocator would, and sharing that heap between threads.

use std::mem::MaybeUninit;
use std::sync::LazyLock;
use std::thread;

use fixed_heap::{HeapAllocator, MisusePolicy, Region};

static HEAP: LazyLock<HeapAllocator> = LazyLock::new(|| {
    let buffer: &'static mut [MaybeUninit<u8>] =
        Box::leak(Box::new([MaybeUninit::uninit(); 64 * 1024]));

    HeapAllocator::builder()
        .region(Region::from_static(buffer))
        .misuse_policy(MisusePolicy::Panic)
        .build()
});

fn main() {
    let workers = (0..4_u8)
        .map(|worker| {
            thread::spawn(move || {
                for round in 0..100_usize {
                    let len = 16 * (round % 8 + 1);
                    let ptr = HEAP.zero_allocate(len, 1).unwrap();

                    // SAFETY: The allocation is `len` bytes long and owned by this thread.
                    unsafe {
                        ptr.write_bytes(worker, len);
                    }

                    HEAP.release(ptr.as_ptr());
                }
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().unwrap();
    }

    let stats = HEAP.stats();
    println!("{stats}");
    assert_eq!(stats.allocated_bytes, 0);
}
