//! # Memory Layout

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Size of a physical frame and of a virtual page.
pub const PAGE_SIZE: u32 = 4096;

/// Number of entries in a page directory and in a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// First page-directory slot that belongs to kernel space (`0xC000_0000 >> 22`).
pub const KERNEL_PDE_START: usize = (KERNEL_VIRTUAL_BASE.as_u32() >> 22) as usize;

/// Start of the physical range tracked by the frame allocator.
pub const PHYS_MEMORY_START: PhysicalAddress = PhysicalAddress::new(0x0010_0000); // 1 MiB

/// End (exclusive) of the physical range tracked by the frame allocator.
pub const PHYS_MEMORY_END: PhysicalAddress = PhysicalAddress::new(0x0100_0000); // 16 MiB

/// Where the kernel image is loaded (LMA).
pub const KERNEL_IMAGE_START: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

/// End (exclusive) of the region reserved for the kernel image.
pub const KERNEL_IMAGE_END: PhysicalAddress = PhysicalAddress::new(0x0020_0000);

/// Bytes of low physical memory that are identity mapped so the paging switch
/// keeps executing right after CR0.PG is set.
pub const IDENTITY_MAP_BYTES: u32 = 0x0040_0000; // 4 MiB

/// Higher-half base: physical `pa` is reachable at `KERNEL_VIRTUAL_BASE + pa`.
pub const KERNEL_VIRTUAL_BASE: VirtualAddress = VirtualAddress::new(0xC000_0000);

/// Start of the kernel's page-granular allocation window.
pub const KERNEL_HEAP_START: VirtualAddress = VirtualAddress::new(0xD000_0000);

/// End (exclusive) of the kernel's page-granular allocation window.
pub const KERNEL_HEAP_END: VirtualAddress = VirtualAddress::new(0xE000_0000);

/// Conventional load address of user code.
pub const USER_CODE_BASE: VirtualAddress = VirtualAddress::new(0x0804_8000);

/// Start of the user heap.
pub const USER_HEAP_START: VirtualAddress = VirtualAddress::new(0x1000_0000);

/// End (exclusive) of the user heap.
pub const USER_HEAP_END: VirtualAddress = VirtualAddress::new(0x4000_0000);

/// Top of the user stack; the stack grows down from here.
pub const USER_STACK_TOP: VirtualAddress = VirtualAddress::new(0xBFFF_F000);

/// Size of the initial user stack mapping.
pub const USER_STACK_SIZE: u32 = 1024 * 1024;

/// Initial extent of the kernel heap.
pub const INITIAL_HEAP_SIZE: u32 = 1024 * 1024;

const _: () = {
    assert!(PHYS_MEMORY_START.as_u32().is_multiple_of(PAGE_SIZE));
    assert!(PHYS_MEMORY_END.as_u32().is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_IMAGE_START.as_u32() >= PHYS_MEMORY_START.as_u32());
    assert!(KERNEL_IMAGE_END.as_u32() <= PHYS_MEMORY_END.as_u32());
    assert!(IDENTITY_MAP_BYTES.is_multiple_of(4 * 1024 * 1024));
    assert!(KERNEL_HEAP_START.as_u32() > KERNEL_VIRTUAL_BASE.as_u32());
    assert!(KERNEL_HEAP_END.as_u32() > KERNEL_HEAP_START.as_u32());
    assert!(
        KERNEL_HEAP_START.as_u32() - KERNEL_VIRTUAL_BASE.as_u32() >= PHYS_MEMORY_END.as_u32(),
        "higher-half direct map must not overlap the kernel heap window"
    );
    assert!(USER_STACK_TOP.as_u32() < KERNEL_VIRTUAL_BASE.as_u32());
    assert!(USER_HEAP_END.as_u32() <= USER_STACK_TOP.as_u32() - USER_STACK_SIZE);
    assert!(INITIAL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_PDE_START == 768);
};
