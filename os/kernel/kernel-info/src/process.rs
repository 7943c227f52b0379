//! # Process and Scheduling Tunables

/// Capacity of the process table, including the idle process.
pub const MAX_PROCESSES: usize = 64;

/// Pid of the protected idle process.
pub const IDLE_PID: u32 = 1;

/// Size of each process's kernel-allocated stack.
pub const PROCESS_STACK_SIZE: usize = 4096;

/// Ticks granted per quantum. Recorded per process; the scheduler rotates every tick.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Frequency at which the external timer driver delivers ticks.
pub const TIMER_FREQUENCY_HZ: u32 = 100;

/// Maximum length of a process name in bytes.
pub const PROCESS_NAME_LEN: usize = 32;

/// Kernel code segment selector loaded into `cs` of a fresh context.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Kernel data segment selector loaded into `ds`, `es`, `fs`, `gs` and `ss`.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// EFLAGS of a fresh context: reserved bit 1 and IF.
pub const INITIAL_EFLAGS: u32 = 0x0000_0202;

const _: () = {
    assert!(MAX_PROCESSES > IDLE_PID as usize);
    assert!(PROCESS_STACK_SIZE.is_multiple_of(16));
    assert!(TIMER_FREQUENCY_HZ > 0 && TIMER_FREQUENCY_HZ <= 1000);
    assert!(INITIAL_EFLAGS & (1 << 9) != 0, "fresh contexts must run with interrupts enabled");
};
