use crate::IrqGuard;
use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use kernel_registers::Platform;

/// Kernel state shared between ordinary control flow and the timer interrupt.
///
/// Every access disables interrupts first and then takes a flag. On the one
/// core the flag is never contended; if it is, an interrupt path re-entered a
/// section that was already open.
pub struct IrqLock<T> {
    /// * `false`: unlocked
    /// * `true`: locked
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross contexts.
unsafe impl<T: Send> Sync for IrqLock<T> {}
unsafe impl<T: Send> Send for IrqLock<T> {}

impl<T> IrqLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Disable interrupts, then acquire.
    #[inline]
    pub fn lock<'a, P: Platform + ?Sized>(&'a self, platform: &'a P) -> IrqLockGuard<'a, T, P> {
        let irq = IrqGuard::new(platform);
        let guard = self.acquire();
        IrqLockGuard { guard, _irq: irq }
    }

    /// Acquire inside a section the caller already closed with `irq`.
    ///
    /// Dropping the returned guard releases the lock but leaves interrupts
    /// disabled until `irq` itself is dropped.
    #[inline]
    pub fn lock_under<'a, P: Platform + ?Sized>(&'a self, _irq: &'a IrqGuard<'_, P>) -> LockGuard<'a, T> {
        self.acquire()
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock_under<'a, P: Platform + ?Sized>(
        &'a self,
        _irq: &'a IrqGuard<'_, P>,
    ) -> Option<LockGuard<'a, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(LockGuard { lock: self })
        } else {
            None
        }
    }

    /// Closure convenience, built on [`lock`](Self::lock).
    #[inline]
    pub fn with_lock<P: Platform + ?Sized, R>(&self, platform: &P, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock(platform);
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn acquire(&self) -> LockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        LockGuard { lock: self }
    }
}

/// Access to the value of an [`IrqLock`] while interrupts are held off elsewhere.
pub struct LockGuard<'a, T> {
    lock: &'a IrqLock<T>,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Lock plus interrupt section; releases the lock first, then restores IF.
pub struct IrqLockGuard<'a, T, P: Platform + ?Sized> {
    guard: LockGuard<'a, T>,
    _irq: IrqGuard<'a, P>,
}

impl<T, P: Platform + ?Sized> Deref for IrqLockGuard<'_, T, P> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, P: Platform + ?Sized> DerefMut for IrqLockGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
