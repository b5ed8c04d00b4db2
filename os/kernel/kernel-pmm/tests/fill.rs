mod common;

use common::{HostPlatform, arena, node};
use kernel_pmm::{AllocFlags, FREE_FILL_BYTE, Node, NodeConfig, PAGE_SIZE, PhysicalAddress};

const BASE: u64 = 0x20_0000;
const PAGES: u64 = 16;

fn backed(config: NodeConfig) -> Node<HostPlatform> {
    node(
        HostPlatform::unbacked().with_ram(BASE, PAGES),
        config,
        &[arena("ram", 0, BASE, PAGES)],
    )
}

fn is_poisoned(node: &Node<HostPlatform>, pa: PhysicalAddress) -> bool {
    node.platform()
        .read_page(pa)
        .iter()
        .all(|b| *b == FREE_FILL_BYTE)
}

#[test]
fn fill_from_construction_poisons_boot_pages() {
    let node = backed(NodeConfig::new().with_free_fill(true));
    assert!(node.is_fill_enforced());
    for i in 0..PAGES {
        assert!(is_poisoned(&node, PhysicalAddress::new(BASE + i * PAGE_SIZE)));
    }
}

#[test]
fn reallocated_page_reads_back_the_pattern() {
    let node = backed(NodeConfig::new().with_free_fill(true));

    let p = node.alloc_page(AllocFlags::ANY).unwrap();
    let addr = p.paddr();
    // The owner scribbles over its page.
    for off in [0, 1, 4095] {
        node.platform().write_byte(addr, off, 0xAA);
    }
    node.free_page(p);
    assert!(is_poisoned(&node, addr));

    let p2 = node.alloc_page(AllocFlags::ANY).unwrap();
    assert_eq!(p2.paddr(), addr);
    assert!(is_poisoned(&node, p2.paddr()));
    node.free_page(p2);
}

#[test]
fn enforce_fill_poisons_only_free_pages() {
    let node = backed(NodeConfig::new());
    assert!(!node.is_fill_enforced());

    let held = node.alloc_page(AllocFlags::ANY).unwrap();
    node.enforce_fill();
    assert!(node.is_fill_enforced());

    assert!(!is_poisoned(&node, held.paddr()));
    for i in 1..PAGES {
        assert!(is_poisoned(&node, PhysicalAddress::new(BASE + i * PAGE_SIZE)));
    }

    let addr = held.paddr();
    node.free_page(held);
    assert!(is_poisoned(&node, addr));
}

#[test]
fn every_allocation_path_checks_and_restores_fill() {
    let node = backed(NodeConfig::new().with_free_fill(true));

    let bulk = node.alloc_pages(3, AllocFlags::ANY).unwrap();
    let range = node
        .alloc_range(PhysicalAddress::new(BASE + 8 * PAGE_SIZE), 2)
        .unwrap();
    let (base, run) = node.alloc_contiguous(2, 13, AllocFlags::ANY).unwrap();
    assert_eq!(base.as_u64() % 0x2000, 0);

    for list in [&bulk, &range, &run] {
        for page in list {
            node.platform().write_byte(page.paddr(), 7, 0);
        }
    }
    node.free_list(bulk);
    node.free_list(range);
    node.free_list(run);

    assert_eq!(node.count_free_pages(), PAGES);
    for i in 0..PAGES {
        assert!(is_poisoned(&node, PhysicalAddress::new(BASE + i * PAGE_SIZE)));
    }
}

#[test]
fn failed_range_leaves_pages_poisoned() {
    let node = backed(NodeConfig::new().with_free_fill(true));
    let busy = node
        .alloc_range(PhysicalAddress::new(BASE + 3 * PAGE_SIZE), 1)
        .unwrap();
    assert!(node.alloc_range(PhysicalAddress::new(BASE), 5).is_err());
    for i in 0..3 {
        assert!(is_poisoned(&node, PhysicalAddress::new(BASE + i * PAGE_SIZE)));
    }
    node.free_list(busy);
}

#[test]
#[should_panic(expected = "free fill corrupted")]
fn write_after_free_is_caught() {
    let node = backed(NodeConfig::new().with_free_fill(true));
    let p = node.alloc_page(AllocFlags::ANY).unwrap();
    let addr = p.paddr();
    node.free_page(p);

    // Use after free: a stale writer touches the page.
    node.platform().write_byte(addr, 0x80, 0x00);
    let _ = node.alloc_page(AllocFlags::ANY);
}

#[test]
#[should_panic(expected = "already enforced")]
fn enforce_fill_twice_panics() {
    let node = backed(NodeConfig::new());
    node.enforce_fill();
    node.enforce_fill();
}
