use kernel_alloc::heap::{Heap, HeapConfig};
use kernel_alloc::pages::HostPageProvider;
use kernel_proc::{Pid, Priority, ProcessError, ProcessState, Scheduler};
use kernel_registers::{HostedPlatform, Platform};

fn heap() -> Heap<HostPageProvider> {
    let mut heap = Heap::new(HostPageProvider::new());
    heap.init(HeapConfig::default()).unwrap();
    heap
}

#[test]
fn timer_ticks_rotate_through_ready_processes() {
    let mut mem = heap();
    let mut s: Scheduler = Scheduler::new();
    let pids: Vec<Pid> = ["counter", "calc", "monitor"]
        .into_iter()
        .map(|name| s.create(&mut mem, name, 0x0010_0000, Priority::Normal).unwrap())
        .collect();

    let order: Vec<Pid> = (0..6).map(|_| s.tick().next).collect();
    assert_eq!(order, [pids[0], pids[1], pids[2], pids[0], pids[1], pids[2]]);
    // each tick is charged to the process running when it arrives
    let runtime: Vec<u64> = pids.iter().map(|p| s.get(*p).unwrap().runtime_ticks()).collect();
    assert_eq!(runtime, [2, 2, 1]);
}

#[test]
fn priority_does_not_reorder_the_queue() {
    let mut mem = heap();
    let mut s: Scheduler = Scheduler::new();
    let low = s.create(&mut mem, "low", 0, Priority::Low).unwrap();
    let high = s.create(&mut mem, "high", 0, Priority::High).unwrap();
    assert_eq!(s.schedule().next, low);
    assert_eq!(s.schedule().next, high);
}

#[test]
fn switches_go_through_the_platform() {
    let mut mem = heap();
    let cpu = HostedPlatform::new();
    let mut s: Scheduler = Scheduler::new();
    let a = s.create(&mut mem, "a", 0x0040_0000, Priority::Normal).unwrap();

    for _ in 0..3 {
        let outcome = s.tick();
        if let Some(switch) = s.context_switch(&outcome) {
            // SAFETY: the hosted platform only records the switch.
            unsafe { switch.perform(&cpu) };
        }
    }
    // idle -> a once, then a keeps running
    let switches = cpu.switches();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].loaded.eip, 0x0040_0000);
    assert_eq!(s.getpid(), Some(a));
    assert!(cpu.interrupts_enabled());
}

#[test]
fn exhausting_the_table_is_not_fatal() {
    let mut mem = heap();
    let mut s: Scheduler = Scheduler::new();
    let mut created = 0;
    loop {
        match s.create(&mut mem, "filler", 0, Priority::Normal) {
            Ok(_) => created += 1,
            Err(e) => {
                assert_eq!(e, ProcessError::TableFull);
                break;
            }
        }
    }
    assert_eq!(created, kernel_info::process::MAX_PROCESSES - 2);
    assert!(s.iter().all(|p| p.state() != ProcessState::Terminated));
    assert_eq!(s.kill(&mut mem, Pid::IDLE), Err(ProcessError::Protected(Pid::IDLE)));
}
