#![allow(dead_code)]

use kernel_pmm::{
    ArenaFlags, ArenaInfo, BumpAllocator, Node, NodeConfig, PAGE_SIZE, PhysicalAddress, Platform,
};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Host stand-in for the machine: RAM is a set of leaked buffers, CPU
/// bring-up and the interrupt flag are plain atomics.
pub struct HostPlatform {
    regions: Vec<Region>,
    active_cpus: AtomicUsize,
    interrupts: AtomicBool,
}

struct Region {
    base: u64,
    len: u64,
    host: usize,
}

impl HostPlatform {
    /// A platform with no backing memory; fill checking must stay off.
    pub fn unbacked() -> Self {
        Self {
            regions: Vec::new(),
            active_cpus: AtomicUsize::new(0),
            interrupts: AtomicBool::new(false),
        }
    }

    /// Back `[base, base + pages * PAGE_SIZE)` with host memory.
    pub fn with_ram(mut self, base: u64, pages: u64) -> Self {
        let len = pages * PAGE_SIZE;
        let buf: &'static mut [u8] = Box::leak(vec![0_u8; len as usize].into_boxed_slice());
        self.regions.push(Region {
            base,
            len,
            host: buf.as_mut_ptr() as usize,
        });
        self
    }

    /// Simulate secondary CPUs coming online.
    pub fn start_cpus(&self, n: usize) {
        self.active_cpus.store(n, Ordering::Release);
    }

    pub fn set_interrupts(&self, enabled: bool) {
        self.interrupts.store(enabled, Ordering::Release);
    }

    fn host_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let pa = pa.as_u64();
        let region = self
            .regions
            .iter()
            .find(|r| pa >= r.base && pa < r.base + r.len)
            .unwrap_or_else(|| panic!("no host memory behind {pa:#x}"));
        (region.host + (pa - region.base) as usize) as *mut u8
    }

    /// Copy of the page at `pa`.
    pub fn read_page(&self, pa: PhysicalAddress) -> Vec<u8> {
        let ptr = self.host_ptr(pa);
        unsafe { std::slice::from_raw_parts(ptr, PAGE_SIZE as usize) }.to_vec()
    }

    pub fn write_byte(&self, pa: PhysicalAddress, offset: usize, value: u8) {
        let ptr = self.host_ptr(pa);
        unsafe { ptr.add(offset).write(value) };
    }
}

impl Platform for HostPlatform {
    unsafe fn phys_to_virt(&self, pa: PhysicalAddress) -> *mut u8 {
        self.host_ptr(pa)
    }

    fn active_cpu_count(&self) -> usize {
        self.active_cpus.load(Ordering::Acquire)
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::Acquire)
    }
}

/// A boot allocator over a fresh leaked region.
pub fn boot_allocator() -> BumpAllocator {
    BumpAllocator::new(Box::leak(
        vec![MaybeUninit::uninit(); 1 << 20].into_boxed_slice(),
    ))
}

pub fn arena(name: &'static str, priority: u32, base: u64, pages: u64) -> ArenaInfo {
    ArenaInfo::new(
        name,
        ArenaFlags::new(),
        priority,
        PhysicalAddress::new(base),
        pages * PAGE_SIZE,
    )
}

/// A node over the given arenas, with the boot window already closed.
pub fn node(platform: HostPlatform, config: NodeConfig, arenas: &[ArenaInfo]) -> Node<HostPlatform> {
    let mut boot = boot_allocator();
    let mut node = Node::new(platform, config);
    for info in arenas {
        node.add_arena(*info, &mut boot).expect("boot memory");
    }
    node.platform().start_cpus(4);
    node.platform().set_interrupts(true);
    node
}

/// A node with one 100-page arena at 1 MiB and no backing memory.
pub fn hundred_pages() -> Node<HostPlatform> {
    node(
        HostPlatform::unbacked(),
        NodeConfig::new(),
        &[arena("ram", 0, 0x10_0000, 100)],
    )
}
