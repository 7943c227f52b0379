use crate::context::CpuContext;
use crate::cr0::Cr0;
use crate::cr3::Cr3;
use crate::eflags::Eflags;
use crate::platform::Platform;
use crate::{LoadRegister, LoadRegisterUnsafe, StoreRegisterUnsafe};
use core::mem::offset_of;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// [`Platform`] on a 32-bit x86 CPU in ring 0.
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Platform;

impl Platform for X86Platform {
    unsafe fn load_page_directory(&self, directory: PhysicalPage<Size4K>) {
        unsafe { Cr3::from_directory(directory).store_unsafe() }
    }

    fn page_directory(&self) -> PhysicalPage<Size4K> {
        // SAFETY: reading CR3 has no side effects in ring 0.
        unsafe { Cr3::load_unsafe() }.directory().page()
    }

    unsafe fn enable_paging(&self) {
        unsafe {
            let cr0 = Cr0::load_unsafe();
            cr0.with_paging_enabled().store_unsafe();
        }
    }

    fn paging_enabled(&self) -> bool {
        // SAFETY: reading CR0 has no side effects in ring 0.
        unsafe { Cr0::load_unsafe() }.pg_paging()
    }

    fn flush_tlb_entry(&self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_usize(), options(nostack, preserves_flags));
        }
    }

    fn interrupts_enabled(&self) -> bool {
        Eflags::load().if_interrupt_enable()
    }

    fn disable_interrupts(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    fn enable_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }

    unsafe fn read_port(&self, port: u16) -> u8 {
        let value: u8;
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags));
        }
        value
    }

    unsafe fn write_port(&self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }

    unsafe fn switch_context(&self, save: *mut CpuContext, load: *const CpuContext) {
        unsafe { switch_context_cdecl(save, load) }
    }

    unsafe fn resume_context(&self, load: *const CpuContext) {
        unsafe { resume_context_cdecl(load) }
    }
}

/// Saves the callee-saved registers, the caller's stack pointer and the
/// return address into `save`, then restores `load`. A saved context resumes
/// as if this call returned with `eax = 0`.
#[unsafe(naked)]
unsafe extern "C" fn switch_context_cdecl(_save: *mut CpuContext, _load: *const CpuContext) {
    core::arch::naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",
        "mov [eax + {ebx}], ebx",
        "mov [eax + {esi}], esi",
        "mov [eax + {edi}], edi",
        "mov [eax + {ebp}], ebp",
        "lea ecx, [esp + 4]",
        "mov [eax + {esp}], ecx",
        "mov ecx, [esp]",
        "mov [eax + {eip}], ecx",
        "pushfd",
        "pop ecx",
        "mov [eax + {eflags}], ecx",
        "mov dword ptr [eax + {eax}], 0",
        // restore
        "mov ebx, [edx + {ebx}]",
        "mov esi, [edx + {esi}]",
        "mov edi, [edx + {edi}]",
        "mov ebp, [edx + {ebp}]",
        "mov esp, [edx + {esp}]",
        "push dword ptr [edx + {eip}]",
        "push dword ptr [edx + {eflags}]",
        "mov eax, [edx + {eax}]",
        "mov ecx, [edx + {ecx}]",
        "mov edx, [edx + {edx}]",
        "popfd",
        "ret",
        eax = const offset_of!(CpuContext, eax),
        ebx = const offset_of!(CpuContext, ebx),
        ecx = const offset_of!(CpuContext, ecx),
        edx = const offset_of!(CpuContext, edx),
        esi = const offset_of!(CpuContext, esi),
        edi = const offset_of!(CpuContext, edi),
        esp = const offset_of!(CpuContext, esp),
        ebp = const offset_of!(CpuContext, ebp),
        eip = const offset_of!(CpuContext, eip),
        eflags = const offset_of!(CpuContext, eflags),
    )
}

#[unsafe(naked)]
unsafe extern "C" fn resume_context_cdecl(_load: *const CpuContext) {
    core::arch::naked_asm!(
        "mov edx, [esp + 4]",
        "mov ebx, [edx + {ebx}]",
        "mov esi, [edx + {esi}]",
        "mov edi, [edx + {edi}]",
        "mov ebp, [edx + {ebp}]",
        "mov esp, [edx + {esp}]",
        "push dword ptr [edx + {eip}]",
        "push dword ptr [edx + {eflags}]",
        "mov eax, [edx + {eax}]",
        "mov ecx, [edx + {ecx}]",
        "mov edx, [edx + {edx}]",
        "popfd",
        "ret",
        eax = const offset_of!(CpuContext, eax),
        ebx = const offset_of!(CpuContext, ebx),
        ecx = const offset_of!(CpuContext, ecx),
        edx = const offset_of!(CpuContext, edx),
        esi = const offset_of!(CpuContext, esi),
        edi = const offset_of!(CpuContext, edi),
        esp = const offset_of!(CpuContext, esp),
        ebp = const offset_of!(CpuContext, ebp),
        eip = const offset_of!(CpuContext, eip),
        eflags = const offset_of!(CpuContext, eflags),
    )
}
