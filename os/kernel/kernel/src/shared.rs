//! Interrupt-safe access to the kernel.

use crate::kernel::Kernel;
use crate::memory::HeapPages;
use kernel_proc::ScheduleOutcome;
use kernel_registers::Platform;
use kernel_sync::{IrqGuard, IrqLock};
use kernel_vmem::PhysMapper;

/// The kernel behind an [`IrqLock`]: every access runs with interrupts off.
pub struct SharedKernel<'m, M: PhysMapper, P: Platform, H: HeapPages> {
    platform: &'m P,
    inner: IrqLock<Kernel<'m, M, P, H>>,
}

impl<'m, M: PhysMapper, P: Platform, H: HeapPages> SharedKernel<'m, M, P, H> {
    #[must_use]
    pub fn new(kernel: Kernel<'m, M, P, H>) -> Self {
        Self {
            platform: kernel.platform(),
            inner: IrqLock::new(kernel),
        }
    }

    /// Run `f` on the kernel with interrupts disabled.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<'m, M, P, H>) -> R) -> R {
        self.inner.with_lock(self.platform, f)
    }

    /// Timer interrupt entry, once per tick at
    /// [`TIMER_FREQUENCY_HZ`](kernel_info::process::TIMER_FREQUENCY_HZ).
    ///
    /// The lock is released before the CPU switches, while interrupts stay
    /// off until the switched-to context resumes.
    ///
    /// # Safety
    /// The saved contexts must describe runnable code on mapped stacks, and
    /// `self` must not move while any process context is live.
    pub unsafe fn timer_tick(&self) -> ScheduleOutcome {
        // SAFETY: forwarded to the caller.
        unsafe { self.decide_and_switch(|k| k.scheduler_tick()) }
    }

    /// Give up the CPU voluntarily.
    ///
    /// # Safety
    /// As [`timer_tick`](Self::timer_tick).
    pub unsafe fn yield_now(&self) -> ScheduleOutcome {
        // SAFETY: forwarded to the caller.
        unsafe { self.decide_and_switch(|k| k.schedule()) }
    }

    unsafe fn decide_and_switch(
        &self,
        decide: impl FnOnce(&mut Kernel<'m, M, P, H>) -> ScheduleOutcome,
    ) -> ScheduleOutcome {
        let irq = IrqGuard::new(self.platform);
        let (outcome, switch) = {
            let mut kernel = self.inner.lock_under(&irq);
            let outcome = decide(&mut *kernel);
            let switch = kernel.context_switch(&outcome);
            (outcome, switch)
        };
        if let Some(switch) = switch {
            // SAFETY: the contexts live in the locked kernel, which nothing
            // touches while interrupts are off.
            unsafe { switch.perform(self.platform) };
        }
        drop(irq);
        outcome
    }

    #[must_use]
    pub fn into_inner(self) -> Kernel<'m, M, P, H> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use kernel_alloc::heap::HeapConfig;
    use kernel_alloc::pages::HostPageProvider;
    use kernel_proc::{Pid, Priority};
    use kernel_registers::HostedPlatform;
    use kernel_vmem::ArenaPhysMapper;

    #[test]
    fn tick_switches_to_the_next_ready_process() {
        let mapper = ArenaPhysMapper::new(16 * 1024 * 1024);
        let platform = HostedPlatform::new();
        let config = KernelConfig {
            heap: HeapConfig {
                size: 64 * 1024,
                ..HeapConfig::default()
            },
            ..KernelConfig::default()
        };
        let kernel = Kernel::boot(config, &mapper, &platform, HostPageProvider::new()).unwrap();
        let shared = SharedKernel::new(kernel);

        let worker = shared
            .with(|k| k.create_process("worker", 0x0040_0000, Priority::Normal))
            .unwrap();
        // SAFETY: the hosted platform only records switches.
        let outcome = unsafe { shared.timer_tick() };
        assert_eq!(outcome.previous, Some(Pid::IDLE));
        assert_eq!(outcome.next, worker);

        let switches = platform.switches();
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].loaded.eip, 0x0040_0000);
        // restored once the switch is done
        assert!(platform.interrupts_enabled());

        // SAFETY: as above.
        let outcome = unsafe { shared.timer_tick() };
        assert!(!outcome.switch);
        assert_eq!(platform.switches().len(), 1);
        assert_eq!(shared.with(|k| k.scheduler().ticks()), 2);
    }
}
