use crate::context::CpuContext;
use crate::platform::Platform;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// One context switch observed by [`HostedPlatform`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchRecord {
    /// Whether the outgoing context was saved (`switch_context`) or dropped (`resume_context`).
    pub saved: bool,
    /// The context that would have been loaded.
    pub loaded: CpuContext,
}

/// [`Platform`] that records instead of executing privileged instructions.
///
/// Context switches do not transfer control; they are logged and the call
/// returns immediately.
#[derive(Debug)]
pub struct HostedPlatform {
    directory: Cell<u32>,
    paging: Cell<bool>,
    interrupts: Cell<bool>,
    tlb_flushes: RefCell<Vec<VirtualAddress>>,
    port_writes: RefCell<Vec<(u16, u8)>>,
    switches: RefCell<Vec<SwitchRecord>>,
}

impl HostedPlatform {
    /// A CPU with paging off and interrupts enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            directory: Cell::new(0),
            paging: Cell::new(false),
            interrupts: Cell::new(true),
            tlb_flushes: RefCell::new(Vec::new()),
            port_writes: RefCell::new(Vec::new()),
            switches: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn tlb_flushes(&self) -> Vec<VirtualAddress> {
        self.tlb_flushes.borrow().clone()
    }

    /// Bytes written to `port`, in order.
    #[must_use]
    pub fn port_output(&self, port: u16) -> Vec<u8> {
        self.port_writes
            .borrow()
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, v)| *v)
            .collect()
    }

    #[must_use]
    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.borrow().clone()
    }
}

impl Default for HostedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostedPlatform {
    unsafe fn load_page_directory(&self, directory: PhysicalPage<Size4K>) {
        self.directory.set(directory.base().as_u32());
    }

    fn page_directory(&self) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(self.directory.get()).page()
    }

    unsafe fn enable_paging(&self) {
        self.paging.set(true);
    }

    fn paging_enabled(&self) -> bool {
        self.paging.get()
    }

    fn flush_tlb_entry(&self, va: VirtualAddress) {
        self.tlb_flushes.borrow_mut().push(va);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn disable_interrupts(&self) {
        self.interrupts.set(false);
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }

    unsafe fn read_port(&self, _port: u16) -> u8 {
        0xFF
    }

    unsafe fn write_port(&self, port: u16, value: u8) {
        self.port_writes.borrow_mut().push((port, value));
    }

    unsafe fn switch_context(&self, _save: *mut CpuContext, load: *const CpuContext) {
        let loaded = unsafe { *load };
        self.switches.borrow_mut().push(SwitchRecord { saved: true, loaded });
    }

    unsafe fn resume_context(&self, load: *const CpuContext) {
        let loaded = unsafe { *load };
        self.switches.borrow_mut().push(SwitchRecord { saved: false, loaded });
    }
}
