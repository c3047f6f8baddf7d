use std::sync::Arc;
use std::thread;

use machine::{PAGE_SIZE, Ram};
use vm::FrameAllocator;
use vm::address::PhysAddr;
use vm::frame_allocator;

const PAGES: usize = 16;

fn allocator() -> Arc<FrameAllocator> {
    vm::init(Ram::new(PAGES))
}

#[test]
fn alloc_release_round_trip() {
    let allocator = allocator();
    for n in 1..=PAGES {
        let base = allocator.alloc_contiguous(n).unwrap();
        assert_eq!(allocator.free_pages(), PAGES - n);
        allocator.dealloc(base);
        assert_eq!(allocator.free_pages(), PAGES);
    }
}

#[test]
fn allocations_never_overlap() {
    let allocator = allocator();
    let mut ranges = Vec::new();
    for n in [1, 2, 3, 4] {
        let base = usize::from(allocator.alloc_contiguous(n).unwrap());
        ranges.push(base..base + n);
    }
    for (i, a) in ranges.iter().enumerate() {
        for b in &ranges[i + 1..] {
            assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn exhaustion_returns_none() {
    let allocator = allocator();
    assert!(allocator.alloc_contiguous(PAGES + 1).is_none());
    // 失败的分配不许动帧表
    assert_eq!(allocator.free_pages(), PAGES);

    let base = allocator.alloc_contiguous(PAGES - 3).unwrap();
    assert!(allocator.alloc_contiguous(4).is_none());
    assert!(allocator.alloc_contiguous(3).is_some());
    allocator.dealloc(base);
}

#[test]
fn releasing_a_run_spares_its_neighbour() {
    let allocator = allocator();
    let a = allocator.alloc_contiguous(2).unwrap();
    let b = allocator.alloc_contiguous(3).unwrap();
    // 首次适应下两段物理上背靠背
    assert_eq!(a + 2, b);

    allocator.dealloc(a);
    assert_eq!(allocator.free_pages(), PAGES - 3);

    // 归还的空洞可以重用，而邻居的三页寸土未失
    let again = allocator.alloc_contiguous(2).unwrap();
    assert_eq!(again, a);

    allocator.dealloc(again);
    allocator.dealloc(b);
    assert_eq!(allocator.free_pages(), PAGES);
}

#[test]
fn bootstrap_steal_is_monotone() {
    let allocator = FrameAllocator::new(Ram::new(PAGES));
    let first = allocator.steal(2);
    let second = allocator.steal(3);
    assert_eq!(first + 2 * PAGE_SIZE, second);
    assert_eq!(allocator.free_pages(), PAGES - 5);

    // 帧表只接管启动分配器没碰过的部分
    allocator.init();
    assert_eq!(allocator.free_pages(), PAGES - 5);
    assert!(allocator.alloc_contiguous(PAGES - 5).is_some());
    assert!(allocator.alloc_contiguous(1).is_none());
}

#[test]
#[should_panic(expected = "after the frame table took over")]
fn steal_after_init_is_fatal() {
    let allocator = allocator();
    allocator.steal(1);
}

#[test]
#[should_panic(expected = "before the frame table exists")]
fn release_before_init_is_fatal() {
    let allocator = FrameAllocator::new(Ram::new(PAGES));
    let base = allocator.steal(1);
    allocator.dealloc(base.page_number());
}

#[test]
#[should_panic(expected = "has not been allocated")]
fn double_free_is_fatal() {
    let allocator = allocator();
    let base = allocator.alloc_contiguous(2).unwrap();
    allocator.dealloc(base);
    allocator.dealloc(base);
}

#[test]
fn frame_pages_come_back_zeroed() {
    let allocator = allocator();
    let frame = frame_allocator::alloc(&allocator).unwrap();
    let ppn = frame.ppn;
    ppn.page_bytes_mut().fill(0xab);
    drop(frame);

    let frame = frame_allocator::alloc(&allocator).unwrap();
    assert_eq!(frame.ppn, ppn);
    assert!(frame.ppn.page_bytes().iter().all(|&b| b == 0));
}

#[test]
fn kernel_pages_round_trip() {
    let allocator = allocator();
    let addr = allocator.alloc_kernel_pages(3).unwrap();
    assert!(addr.is_aligned());
    assert_eq!(allocator.free_pages(), PAGES - 3);
    allocator.free_kernel_pages(addr);
    assert_eq!(allocator.free_pages(), PAGES);
}

#[test]
fn concurrent_alloc_release_serialises() {
    let allocator = vm::init(Ram::new(64));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                let n = i % 3 + 1;
                for _ in 0..200 {
                    if let Some(base) = allocator.alloc_contiguous(n) {
                        allocator.dealloc(base);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(allocator.free_pages(), 64);
}

#[test]
fn steal_returns_page_aligned_addresses() {
    let allocator = FrameAllocator::new(Ram::new(PAGES));
    let addr: PhysAddr = allocator.steal(1);
    assert!(addr.is_aligned());
}
