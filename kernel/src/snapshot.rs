//! Register snapshots of a failing CPU.
//!
//! Two fixed `repr(C)` blocks per CPU: the core registers of every ARM mode
//! ([`CoreRegs`], 40 words) and the CP15 memory-management registers
//! ([`MmuRegs`], 18 words). The layouts are part of the dump format read by
//! offline tools, so field order must not change.
//!
//! # Locking
//!
//! Each slot sits behind a `spin::Mutex`. The failure path only ever uses
//! `try_lock`: if a slot is busy (a CPU died while capturing) the capture is
//! skipped rather than waiting on a lock that may never be released.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::mutex::SpinMutex as Mutex;

use crate::arch::CpuOps;
use crate::per_cpu;
use crate::percpu::{CpuId, PerCpu};

macro_rules! register_block {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $($(#[$fmeta:meta])* $field:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: u32,)+
        }

        impl $name {
            pub const ZERO: Self = Self { $($field: 0,)+ };

            /// Visit every register in layout order.
            pub fn for_each(&self, mut visit: impl FnMut(&'static str, u32)) {
                $(visit(stringify!($field), self.$field);)+
            }
        }
    };
}

register_block! {
    /// Core registers, including the banked registers of every mode.
    pub struct CoreRegs {
        r0, r1, r2, r3, r4, r5, r6, r7, r8, r9, r10, r11, r12,
        /// SVC (kernel) mode.
        r13_svc, r14_svc, spsr_svc,
        pc, cpsr,
        /// USR/SYS mode.
        r13_usr, r14_usr,
        /// FIQ mode has its own r8..r14.
        r8_fiq, r9_fiq, r10_fiq, r11_fiq, r12_fiq, r13_fiq, r14_fiq, spsr_fiq,
        r13_irq, r14_irq, spsr_irq,
        r13_mon, r14_mon, spsr_mon,
        r13_abt, r14_abt, spsr_abt,
        r13_und, r14_und, spsr_und,
    }
}

register_block! {
    /// CP15 memory-management registers.
    pub struct MmuRegs {
        sctlr, ttbr0, ttbr1, ttbcr, dacr, dfsr, dfar, ifsr, ifar,
        /// Auxiliary fault status. Not read on ARMv7-A; always zero.
        dafsr,
        /// Auxiliary fault status. Not read on ARMv7-A; always zero.
        iafsr,
        pmrrr, nmrrr, fcsepid, context, urwtpid, urotpid, potpidr,
    }
}

const _: () = assert!(core::mem::size_of::<CoreRegs>() == 40 * 4);
const _: () = assert!(core::mem::size_of::<MmuRegs>() == 18 * 4);

/// Byte offsets into [`CoreRegs`] used by the capture routine.
pub mod core_offsets {
    pub const R0: usize = 0;
    pub const R13_SVC: usize = 13 * 4;
    pub const PC: usize = 16 * 4;
    pub const R13_USR: usize = 18 * 4;
    pub const R8_FIQ: usize = 20 * 4;
    pub const R13_IRQ: usize = 28 * 4;
    pub const R13_MON: usize = 31 * 4;
    pub const R13_ABT: usize = 34 * 4;
    pub const R13_UND: usize = 37 * 4;
}

/// Per-CPU snapshot slots.
pub struct SnapshotStore {
    core: PerCpu<Mutex<CoreRegs>>,
    mmu: PerCpu<Mutex<MmuRegs>>,
    captures: PerCpu<AtomicU32>,
}

impl SnapshotStore {
    pub const fn new() -> Self {
        Self {
            core: per_cpu!(Mutex::new(CoreRegs::ZERO)),
            mmu: per_cpu!(Mutex::new(MmuRegs::ZERO)),
            captures: per_cpu!(AtomicU32::new(0)),
        }
    }

    /// Capture the MMU block then the core block of `cpu`.
    ///
    /// Returns `false` if either slot was busy. Repeated captures overwrite.
    pub fn capture(&self, cpu: CpuId, ops: &dyn CpuOps) -> bool {
        let (Some(mut mmu), Some(mut core)) =
            (self.mmu.get(cpu).try_lock(), self.core.get(cpu).try_lock())
        else {
            log::warn!("snapshot: {} slot busy, capture skipped", cpu);
            return false;
        };

        ops.save_mmu_regs(&mut mmu);
        ops.save_core_regs(&mut core);
        self.captures.get(cpu).fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn core(&self, cpu: CpuId) -> CoreRegs {
        *self.core.get(cpu).lock()
    }

    pub fn mmu(&self, cpu: CpuId) -> MmuRegs {
        *self.mmu.get(cpu).lock()
    }

    /// How many times `cpu` has been captured.
    pub fn capture_count(&self, cpu: CpuId) -> u32 {
        self.captures.get(cpu).load(Ordering::Relaxed)
    }

    /// Address of a CPU's core block, for the layout descriptor.
    pub fn core_addr(&self, cpu: CpuId) -> usize {
        self.core.get(cpu).as_mut_ptr() as usize
    }

    pub fn mmu_addr(&self, cpu: CpuId) -> usize {
        self.mmu.get(cpu).as_mut_ptr() as usize
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::IrqFlags;

    struct FakeCpu;

    impl CpuOps for FakeCpu {
        fn local_irq_disable(&self) {}
        fn local_irq_save(&self) -> IrqFlags {
            IrqFlags(0)
        }
        fn local_irq_restore(&self, _flags: IrqFlags) {}
        fn save_core_regs(&self, regs: &mut CoreRegs) {
            regs.pc = 0xc000_8000;
            regs.r13_irq = 0xdead_0001;
            regs.spsr_und = 0x1b;
        }
        fn save_mmu_regs(&self, regs: &mut MmuRegs) {
            regs.sctlr = 0x10c5_387d;
            regs.dfar = 0x24;
        }
    }

    #[test]
    fn layout_offsets_match_field_order() {
        let mut regs = CoreRegs::ZERO;
        regs.r13_svc = 1;
        regs.pc = 2;
        regs.r13_usr = 3;
        regs.r8_fiq = 4;
        regs.r13_irq = 5;
        regs.r13_mon = 6;
        regs.r13_abt = 7;
        regs.r13_und = 8;

        let base = &regs as *const CoreRegs as usize;
        let word = |off: usize| unsafe { *((base + off) as *const u32) };
        assert_eq!(word(core_offsets::R13_SVC), 1);
        assert_eq!(word(core_offsets::PC), 2);
        assert_eq!(word(core_offsets::R13_USR), 3);
        assert_eq!(word(core_offsets::R8_FIQ), 4);
        assert_eq!(word(core_offsets::R13_IRQ), 5);
        assert_eq!(word(core_offsets::R13_MON), 6);
        assert_eq!(word(core_offsets::R13_ABT), 7);
        assert_eq!(word(core_offsets::R13_UND), 8);
        assert_eq!(word(core_offsets::R0), 0);
    }

    #[test]
    fn capture_fills_only_the_named_cpu() {
        let store = SnapshotStore::new();
        let cpu2 = CpuId::new(2).unwrap();
        assert!(store.capture(cpu2, &FakeCpu));

        assert_eq!(store.core(cpu2).pc, 0xc000_8000);
        assert_eq!(store.mmu(cpu2).dfar, 0x24);
        assert_eq!(store.mmu(cpu2).dafsr, 0);
        assert_eq!(store.capture_count(cpu2), 1);
        assert_eq!(store.core(CpuId::BOOT), CoreRegs::ZERO);
    }

    #[test]
    fn busy_slot_skips_capture() {
        let store = SnapshotStore::new();
        let cpu = CpuId::BOOT;
        let _held = store.core.get(cpu).lock();
        assert!(!store.capture(cpu, &FakeCpu));
        assert_eq!(store.capture_count(cpu), 0);
    }

    #[test]
    fn for_each_visits_in_layout_order() {
        let mut names = [""; 40];
        let mut n = 0;
        CoreRegs::ZERO.for_each(|name, _| {
            names[n] = name;
            n += 1;
        });
        assert_eq!(n, 40);
        assert_eq!(names[0], "r0");
        assert_eq!(names[16], "pc");
        assert_eq!(names[39], "spsr_und");
    }
}
