use kernel_registers::{HostedPlatform, Platform};
use kernel_sync::{IrqGuard, IrqLock};
use std::{panic, thread};

#[test]
fn lock_disables_interrupts_for_its_lifetime() {
    let cpu = HostedPlatform::new();
    let l = IrqLock::new(0_u32);

    {
        let mut g = l.lock(&cpu);
        assert!(!cpu.interrupts_enabled());
        *g = 41;
    }
    assert!(cpu.interrupts_enabled());

    {
        let mut g = l.lock(&cpu);
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn lock_keeps_interrupts_off_when_already_off() {
    let cpu = HostedPlatform::new();
    cpu.disable_interrupts();
    let l = IrqLock::new(());
    drop(l.lock(&cpu));
    assert!(!cpu.interrupts_enabled());
}

#[test]
fn lock_under_outer_guard_releases_lock_but_not_interrupts() {
    let cpu = HostedPlatform::new();
    let l = IrqLock::new(1_u8);

    let irq = IrqGuard::new(&cpu);
    {
        let g1 = l.try_lock_under(&irq);
        assert!(g1.is_some());
        assert!(l.try_lock_under(&irq).is_none(), "held lock must not be re-entered");
    }
    let g = l.lock_under(&irq);
    assert_eq!(*g, 1);
    drop(g);
    assert!(!cpu.interrupts_enabled());

    drop(irq);
    assert!(cpu.interrupts_enabled());
}

#[test]
fn with_lock_works_and_unlocks() {
    let cpu = HostedPlatform::new();
    let l = IrqLock::new(String::from("a"));
    let len = l.with_lock(&cpu, |s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(l.with_lock(&cpu, |s| s.clone()), "ab");
}

#[test]
fn get_mut_allows_direct_mutation() {
    let mut l = IrqLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.into_inner(), [1, 2, 3, 4]);
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    let threads = 4;
    let iters = 2_000;

    let lock = Arc::new(IrqLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                // Each thread stands in for its own CPU.
                let cpu = HostedPlatform::new();
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(&cpu, |v| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let cpu = HostedPlatform::new();
    assert_eq!(lock.with_lock(&cpu, |v| *v), threads * iters);
}

#[test]
fn lock_and_interrupts_are_restored_on_panic() {
    let cpu = HostedPlatform::new();
    let l = IrqLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(&cpu, |v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");
    assert!(cpu.interrupts_enabled());
    assert_eq!(l.with_lock(&cpu, |v| *v), 123);
}

#[test]
fn irq_lock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&IrqLock::new(0u8));
}
