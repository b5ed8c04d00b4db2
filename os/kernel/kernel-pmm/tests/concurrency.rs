mod common;

use common::{HostPlatform, arena, hundred_pages, node};
use kernel_pmm::{AllocFlags, NodeConfig, PAGE_SIZE, PageFrame, PhysicalAddress};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;

#[test]
fn concurrent_alloc_free_conserves_pages() {
    let node = hundred_pages();
    let held = AtomicU64::new(0);
    let outstanding = Mutex::new(HashSet::<PhysicalAddress>::new());
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS {
            let (node, held, outstanding, barrier) = (&node, &held, &outstanding, &barrier);
            s.spawn(move || {
                let mut mine: Vec<PageFrame> = Vec::new();
                barrier.wait();
                for i in 0..ROUNDS {
                    let keep = (i + t) % 3 != 0;
                    if keep && mine.len() < 8 {
                        if let Ok(frame) = node.alloc_page(AllocFlags::ANY) {
                            held.fetch_add(1, Ordering::SeqCst);
                            assert!(
                                outstanding.lock().unwrap().insert(frame.paddr()),
                                "page {} handed out twice",
                                frame.paddr()
                            );
                            mine.push(frame);
                        }
                    } else if let Some(frame) = mine.pop() {
                        assert!(outstanding.lock().unwrap().remove(&frame.paddr()));
                        held.fetch_sub(1, Ordering::SeqCst);
                        node.free_page(frame);
                    }
                }
                for frame in mine {
                    outstanding.lock().unwrap().remove(&frame.paddr());
                    held.fetch_sub(1, Ordering::SeqCst);
                    node.free_page(frame);
                }
            });
        }
    });

    assert_eq!(held.load(Ordering::SeqCst), 0);
    assert_eq!(node.count_free_pages(), 100);
    assert!(outstanding.lock().unwrap().is_empty());
}

#[test]
fn concurrent_bulk_and_contiguous_never_overlap() {
    let node = node(
        HostPlatform::unbacked(),
        NodeConfig::new(),
        &[arena("ram", 0, 0x100_0000, 512)],
    );
    let outstanding = Mutex::new(HashSet::<PhysicalAddress>::new());
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS {
            let (node, outstanding, barrier) = (&node, &outstanding, &barrier);
            s.spawn(move || {
                barrier.wait();
                for i in 0..200 {
                    let list = if (i + t) % 2 == 0 {
                        node.alloc_pages(5, AllocFlags::ANY)
                    } else {
                        node.alloc_contiguous(4, 14, AllocFlags::ANY)
                            .map(|(base, list)| {
                                assert_eq!(base.as_u64() % (1 << 14), 0);
                                let first = list.front().map(|p| p.paddr());
                                assert_eq!(first, Some(base));
                                for (n, page) in list.iter().enumerate() {
                                    assert_eq!(page.paddr(), base + n as u64 * PAGE_SIZE);
                                }
                                list
                            })
                    };
                    let Ok(list) = list else { continue };

                    for page in &list {
                        let fresh = outstanding.lock().unwrap().insert(page.paddr());
                        assert!(fresh, "page {} handed out twice", page.paddr());
                    }
                    thread::yield_now();
                    for page in &list {
                        outstanding.lock().unwrap().remove(&page.paddr());
                    }
                    node.free_list(list);
                }
            });
        }
    });

    assert_eq!(node.count_free_pages(), 512);
}

#[test]
fn free_count_is_readable_while_allocating() {
    let node = hundred_pages();
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            for _ in 0..ROUNDS {
                let list = node.alloc_pages(10, AllocFlags::ANY).unwrap();
                node.free_list(list);
            }
        });
        s.spawn(|| {
            barrier.wait();
            for _ in 0..ROUNDS {
                let free = node.count_free_pages();
                assert!(free == 90 || free == 100, "impossible estimate {free}");
            }
        });
    });

    assert_eq!(node.count_free_pages(), 100);
}
