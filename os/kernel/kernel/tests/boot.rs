use kernel::{Kernel, KernelConfig, KernelInitError, SharedKernel};
use kernel_alloc::frame_alloc::{FrameAllocError, PmmConfig};
use kernel_alloc::heap::HeapConfig;
use kernel_alloc::pages::HostPageProvider;
use kernel_info::boot::{MemoryRegion, MemoryRegionKind};
use kernel_info::memory::{PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_proc::{Pid, Priority, ProcessState};
use kernel_registers::{HostedPlatform, Platform};
use kernel_vmem::{ArenaPhysMapper, MemoryType};

const MIB: u32 = 1024 * 1024;

static MEMORY_MAP: [MemoryRegion; 3] = [
    MemoryRegion::new(0, 0x0009_F000, MemoryRegionKind::Available),
    MemoryRegion::new(0x000F_0000, 0x0001_0000, MemoryRegionKind::Reserved),
    MemoryRegion::new(MIB, 7 * MIB, MemoryRegionKind::Available),
];

fn small_heap() -> HeapConfig {
    HeapConfig {
        size: 64 * 1024,
        ..HeapConfig::default()
    }
}

#[test]
fn boot_from_a_memory_map_only_hands_out_listed_ram() {
    let mapper = ArenaPhysMapper::new(16 * MIB);
    let platform = HostedPlatform::new();
    let config = KernelConfig {
        heap: small_heap(),
        memory_map: Some(&MEMORY_MAP),
        ..KernelConfig::default()
    };
    let kernel = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap();

    let frames = kernel.frames();
    // 8..16 MiB is absent from the map
    assert!(frames.is_frame_used(PhysicalAddress::new(9 * MIB)));
    // the kernel image stays reserved
    assert!(frames.is_frame_used(PhysicalAddress::new(MIB)));
    assert!(!frames.is_frame_used(PhysicalAddress::new(4 * MIB)));
    kernel.check_heap();
}

#[test]
fn bad_physical_range_fails_the_first_stage() {
    let mapper = ArenaPhysMapper::new(16 * MIB);
    let platform = HostedPlatform::new();
    let config = KernelConfig {
        pmm: PmmConfig {
            memory_start: PhysicalAddress::new(16 * MIB),
            memory_end: PhysicalAddress::new(MIB),
            ..PmmConfig::default()
        },
        ..KernelConfig::default()
    };
    let err = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap_err();
    assert!(matches!(
        err,
        KernelInitError::Frames(FrameAllocError::InvalidRange { .. })
    ));
    assert!(!platform.paging_enabled());
}

#[test]
fn user_address_space_through_the_booted_vmm() {
    let mapper = ArenaPhysMapper::new(16 * MIB);
    let platform = HostedPlatform::new();
    let config = KernelConfig {
        heap: small_heap(),
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap();
    let free_before = kernel.frames().free_frames();

    let vmm = kernel.vmm_mut();
    let dir = vmm.create_user_directory().unwrap();
    let bottom = vmm
        .setup_user_stack(dir, USER_STACK_TOP, USER_STACK_SIZE)
        .unwrap();
    assert_eq!(bottom.as_u32(), USER_STACK_TOP.as_u32() - USER_STACK_SIZE);

    let code = VirtualAddress::new(0x0040_0000);
    vmm.map_region(dir, code, 2 * PAGE_SIZE, MemoryType::UserCode)
        .unwrap();
    assert!(vmm.translate(dir, code).is_some());
    // the kernel half is shared
    assert!(vmm.translate(dir, VirtualAddress::new(0xC010_0000)).is_some());

    vmm.destroy_user_directory(dir).unwrap();
    assert_eq!(kernel.frames().free_frames(), free_before);
}

#[test]
fn processes_round_robin_through_the_shared_kernel() {
    let mapper = ArenaPhysMapper::new(16 * MIB);
    let platform = HostedPlatform::new();
    let config = KernelConfig {
        heap: small_heap(),
        ..KernelConfig::default()
    };
    let kernel = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap();
    let shared = SharedKernel::new(kernel);

    let a = shared
        .with(|k| k.create_process("a", 0x0040_0000, Priority::Normal))
        .unwrap();
    let b = shared
        .with(|k| k.create_process("b", 0x0050_0000, Priority::High))
        .unwrap();

    // SAFETY: the hosted platform only records switches.
    let order: Vec<Pid> = (0..4).map(|_| unsafe { shared.timer_tick() }.next).collect();
    assert_eq!(order, [a, b, a, b]);

    shared.with(|k| k.kill(a)).unwrap();
    assert_eq!(
        shared.with(|k| k.set_state(Pid::IDLE, ProcessState::Blocked)),
        Err(kernel_proc::ProcessError::Protected(Pid::IDLE))
    );
    // SAFETY: as above.
    let outcome = unsafe { shared.yield_now() };
    assert_eq!(outcome.next, b);
    assert!(!outcome.switch);

    let kernel = shared.into_inner();
    assert_eq!(kernel.scheduler().len(), 2);
    kernel.check_heap();
}
