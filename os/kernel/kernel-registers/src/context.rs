use crate::eflags::Eflags;

/// Register state of a suspended kernel thread of execution.
///
/// Field widths follow the native word so the same layout works on 32-bit
/// x86 and on a hosted 64-bit test build. The order is fixed (`repr(C)`)
/// because the context switch code addresses fields by offset.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuContext {
    pub eax: usize,
    pub ebx: usize,
    pub ecx: usize,
    pub edx: usize,
    pub esi: usize,
    pub edi: usize,
    pub esp: usize,
    pub ebp: usize,
    pub eip: usize,
    pub eflags: Eflags,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
}

impl CpuContext {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
            esi: 0,
            edi: 0,
            esp: 0,
            ebp: 0,
            eip: 0,
            eflags: Eflags::new(),
            cs: 0,
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
            ss: 0,
        }
    }

    /// A context that starts executing `entry` on a stack whose topmost
    /// usable slot is `stack_pointer`.
    #[must_use]
    pub const fn new(
        entry: usize,
        stack_pointer: usize,
        code_selector: u16,
        data_selector: u16,
        eflags: Eflags,
    ) -> Self {
        Self {
            esp: stack_pointer,
            ebp: stack_pointer,
            eip: entry,
            eflags,
            cs: code_selector,
            ds: data_selector,
            es: data_selector,
            fs: data_selector,
            gs: data_selector,
            ss: data_selector,
            ..Self::zeroed()
        }
    }

    /// The register a system call or `fork` returns its value in.
    #[must_use]
    pub const fn return_value(&self) -> usize {
        self.eax
    }

    pub const fn set_return_value(&mut self, value: usize) {
        self.eax = value;
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_points_at_entry_and_stack() {
        let flags = Eflags::new().with_if_interrupt_enable(true);
        let ctx = CpuContext::new(0x0010_2000, 0x0030_0FFC, 0x08, 0x10, flags);
        assert_eq!(ctx.eip, 0x0010_2000);
        assert_eq!(ctx.esp, 0x0030_0FFC);
        assert_eq!(ctx.ebp, ctx.esp);
        assert_eq!(ctx.cs, 0x08);
        assert_eq!([ctx.ds, ctx.es, ctx.fs, ctx.gs, ctx.ss], [0x10; 5]);
        assert_eq!(ctx.eflags.into_bits(), 0x202);
        assert_eq!(ctx.return_value(), 0);
    }
}
