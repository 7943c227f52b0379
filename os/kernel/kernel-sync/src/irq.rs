use core::marker::PhantomData;
use kernel_registers::Platform;

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots IF. If interrupts were enabled it disables
/// them, and on drop it re-enables them **only** if they were enabled before,
/// so guards nest.
///
/// On a single core this is the whole mutual-exclusion story: code holding a
/// guard cannot be preempted by the timer tick.
///
/// # Examples
///
/// ```
/// use kernel_registers::{HostedPlatform, Platform};
/// use kernel_sync::IrqGuard;
///
/// let cpu = HostedPlatform::new();
/// {
///     let _outer = IrqGuard::new(&cpu);
///     {
///         let _inner = IrqGuard::new(&cpu);
///     }
///     assert!(!cpu.interrupts_enabled());
/// }
/// assert!(cpu.interrupts_enabled());
/// ```
pub struct IrqGuard<'p, P: Platform + ?Sized> {
    platform: &'p P,
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
    /// The guard restores CPU-local state and must stay on this CPU.
    _not_send: PhantomData<*const ()>,
}

impl<'p, P: Platform + ?Sized> IrqGuard<'p, P> {
    #[inline]
    #[must_use]
    pub fn new(platform: &'p P) -> Self {
        let were_enabled = platform.interrupts_enabled();
        if were_enabled {
            platform.disable_interrupts();
        }
        Self {
            platform,
            were_enabled,
            _not_send: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }

    #[inline]
    #[must_use]
    pub const fn platform(&self) -> &'p P {
        self.platform
    }
}

impl<P: Platform + ?Sized> Drop for IrqGuard<'_, P> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.platform.enable_interrupts();
        }
    }
}
