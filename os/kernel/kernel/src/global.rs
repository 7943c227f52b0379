//! # The kernel singleton on x86
//!
//! Statics for the hardware platform, the direct-map mapper and the QEMU
//! logger, plus the one [`GlobalKernel`] everything else reaches through
//! [`kernel`]. The timer interrupt stub calls [`timer_tick`].

use crate::config::KernelConfig;
use crate::kernel::{Kernel, KernelInitError};
use crate::memory::HeapWindow;
use crate::shared::SharedKernel;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_alloc::vmm::VmmError;
use kernel_proc::ScheduleOutcome;
use kernel_qemu::QemuLogger;
use kernel_registers::X86Platform;
use kernel_sync::SyncOnceCell;
use log::LevelFilter;

pub type GlobalKernel = SharedKernel<'static, DirectMapPhysMapper, X86Platform, HeapWindow>;

static PLATFORM: X86Platform = X86Platform;
static MAPPER: DirectMapPhysMapper = DirectMapPhysMapper::new();
static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Info);
static KERNEL: SyncOnceCell<GlobalKernel> = SyncOnceCell::new();

/// Install the logger, boot the kernel and publish it. Runs once.
///
/// # Errors
/// Any boot stage failure. A second call fails in the VMM stage, since
/// paging is already on.
pub fn init(config: KernelConfig) -> Result<&'static GlobalKernel, KernelInitError> {
    if LOGGER.init().is_err() {
        log::debug!("logger already installed");
    }
    let kernel = Kernel::boot(config, &MAPPER, &PLATFORM, HeapWindow)?;
    KERNEL
        .set(SharedKernel::new(kernel))
        .map_err(|_| KernelInitError::Paging(VmmError::AlreadyInitialized))?;
    KERNEL
        .get()
        .ok_or(KernelInitError::Paging(VmmError::NotInitialized))
}

/// The booted kernel, if [`init`] succeeded.
#[must_use]
pub fn kernel() -> Option<&'static GlobalKernel> {
    KERNEL.get()
}

/// Entry point for the timer interrupt handler.
///
/// # Safety
/// Must be called from the timer interrupt with a valid interrupt frame;
/// see [`SharedKernel::timer_tick`].
pub unsafe fn timer_tick() -> Option<ScheduleOutcome> {
    let kernel = KERNEL.get()?;
    // SAFETY: forwarded to the caller.
    Some(unsafe { kernel.timer_tick() })
}

/// [`GlobalAlloc`] over the global kernel heap. Install it from the kernel
/// binary with `#[global_allocator]`; allocations before [`init`] fail.
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        KERNEL
            .get()
            .and_then(|k| k.with(|k| k.alloc_layout(layout)))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let (Some(kernel), Some(ptr)) = (KERNEL.get(), NonNull::new(ptr)) else {
            return;
        };
        kernel.with(|k| k.free_layout(ptr, layout));
    }
}
