//! ARMv7-A CPU operations.
//!
//! Register capture, IRQ masking, the generic timer and set/way cache
//! maintenance for 32-bit ARM in a privileged mode.
//!
//! Mode numbers used when walking the banked registers:
//! - 0x11 FIQ, 0x12 IRQ, 0x13 SVC, 0x16 MON, 0x17 ABT, 0x1B UND, 0x1F SYS

use core::arch::asm;

use super::traits::{CacheOps, ClockOps, CpuOps, IrqFlags};
use crate::percpu::CpuId;
use crate::snapshot::{CoreRegs, MmuRegs};

/// Read a CP15 register.
macro_rules! mrc {
    ($opc1:literal, $crn:literal, $crm:literal, $opc2:literal) => {{
        let value: u32;
        // SAFETY: reads of CP15 identification and control registers have
        // no side effects.
        unsafe {
            asm!(
                concat!("mrc p15, ", $opc1, ", {}, ", $crn, ", ", $crm, ", ", $opc2),
                out(reg) value,
                options(nomem, nostack, preserves_flags)
            )
        };
        value
    }};
}

/// Write a CP15 register.
macro_rules! mcr {
    ($opc1:literal, $crn:literal, $crm:literal, $opc2:literal, $value:expr) => {{
        let value: u32 = $value;
        // SAFETY: only used for cache maintenance and cache-level selection,
        // neither of which changes memory contents.
        unsafe {
            asm!(
                concat!("mcr p15, ", $opc1, ", {}, ", $crn, ", ", $crm, ", ", $opc2),
                in(reg) value,
                options(nostack, preserves_flags)
            )
        };
    }};
}

#[inline(always)]
fn dsb() {
    // SAFETY: barrier only.
    unsafe { asm!("dsb", options(nostack, preserves_flags)) };
}

#[inline(always)]
fn isb() {
    // SAFETY: barrier only.
    unsafe { asm!("isb", options(nostack, preserves_flags)) };
}

// =============================================================================
// CPU
// =============================================================================

pub struct ArmV7Cpu;

impl CpuOps for ArmV7Cpu {
    #[inline]
    fn local_irq_disable(&self) {
        // SAFETY: masking IRQs on the current CPU is always allowed in a
        // privileged mode.
        unsafe { asm!("cpsid i", options(nomem, nostack)) };
    }

    #[inline]
    fn local_irq_save(&self) -> IrqFlags {
        let cpsr: u32;
        // SAFETY: as above; the previous CPSR is returned to the caller.
        unsafe { asm!("mrs {}, cpsr", "cpsid i", out(reg) cpsr, options(nomem, nostack)) };
        IrqFlags(cpsr)
    }

    #[inline]
    fn local_irq_restore(&self, flags: IrqFlags) {
        // SAFETY: restores the control field saved by `local_irq_save`.
        unsafe { asm!("msr cpsr_c, {}", in(reg) flags.0, options(nomem, nostack)) };
    }

    /// Store r0-r12, the current mode's sp/lr/spsr, pc, cpsr, then visit
    /// SYS, FIQ, IRQ, MON, ABT and UND for their banked registers and return
    /// to the starting mode. Field offsets follow [`crate::snapshot::core_offsets`].
    fn save_core_regs(&self, regs: &mut CoreRegs) {
        let base = regs as *mut CoreRegs;
        // SAFETY: `base` points at a live `CoreRegs` (160 bytes) and every
        // store stays within it. IRQs and FIQs are masked while the mode is
        // switched so no exception sees the foreign banked registers, and the
        // original CPSR is restored before leaving.
        unsafe {
            asm!(
                "str r0, [r0, #0]",
                "str r1, [r0, #4]",
                "str r2, [r0, #8]",
                "str r3, [r0, #12]",
                "str r4, [r0, #16]",
                "str r5, [r0, #20]",
                "str r6, [r0, #24]",
                "str r7, [r0, #28]",
                "str r8, [r0, #32]",
                "str r9, [r0, #36]",
                "str r10, [r0, #40]",
                "str r11, [r0, #44]",
                "str r12, [r0, #48]",
                "str sp, [r0, #52]",
                "str lr, [r0, #56]",
                "mrs r1, spsr",
                "str r1, [r0, #60]",
                "mov r1, pc",
                "str r1, [r0, #64]",
                "mrs r2, cpsr",
                "str r2, [r0, #68]",
                "cpsid if",
                // SYS/USR
                "cps #0x1f",
                "str sp, [r0, #72]",
                "str lr, [r0, #76]",
                // FIQ
                "cps #0x11",
                "str r8, [r0, #80]",
                "str r9, [r0, #84]",
                "str r10, [r0, #88]",
                "str r11, [r0, #92]",
                "str r12, [r0, #96]",
                "str sp, [r0, #100]",
                "str lr, [r0, #104]",
                "mrs r1, spsr",
                "str r1, [r0, #108]",
                // IRQ
                "cps #0x12",
                "str sp, [r0, #112]",
                "str lr, [r0, #116]",
                "mrs r1, spsr",
                "str r1, [r0, #120]",
                // MON
                "cps #0x16",
                "str sp, [r0, #124]",
                "str lr, [r0, #128]",
                "mrs r1, spsr",
                "str r1, [r0, #132]",
                // ABT
                "cps #0x17",
                "str sp, [r0, #136]",
                "str lr, [r0, #140]",
                "mrs r1, spsr",
                "str r1, [r0, #144]",
                // UND
                "cps #0x1b",
                "str sp, [r0, #148]",
                "str lr, [r0, #152]",
                "mrs r1, spsr",
                "str r1, [r0, #156]",
                "msr cpsr_cxsf, r2",
                in("r0") base,
                out("r1") _,
                out("r2") _,
                options(nostack)
            );
        }
    }

    fn save_mmu_regs(&self, regs: &mut MmuRegs) {
        regs.sctlr = mrc!("0", "c1", "c0", "0");
        regs.ttbr0 = mrc!("0", "c2", "c0", "0");
        regs.ttbr1 = mrc!("0", "c2", "c0", "1");
        regs.ttbcr = mrc!("0", "c2", "c0", "2");
        regs.dacr = mrc!("0", "c3", "c0", "0");
        regs.dfsr = mrc!("0", "c5", "c0", "0");
        regs.dfar = mrc!("0", "c6", "c0", "0");
        regs.ifsr = mrc!("0", "c5", "c0", "1");
        regs.ifar = mrc!("0", "c6", "c0", "2");
        // auxiliary fault status registers are implementation defined
        regs.dafsr = 0;
        regs.iafsr = 0;
        regs.pmrrr = mrc!("0", "c10", "c2", "0");
        regs.nmrrr = mrc!("0", "c10", "c2", "1");
        regs.fcsepid = mrc!("0", "c13", "c0", "0");
        regs.context = mrc!("0", "c13", "c0", "1");
        regs.urwtpid = mrc!("0", "c13", "c0", "2");
        regs.urotpid = mrc!("0", "c13", "c0", "3");
        regs.potpidr = mrc!("0", "c13", "c0", "4");
    }

    #[inline]
    fn relax(&self) {
        // SAFETY: hint only.
        unsafe { asm!("wfe", options(nomem, nostack)) };
    }
}

// =============================================================================
// Generic timer
// =============================================================================

/// Nanosecond clock from the architected counter (CNTPCT / CNTFRQ).
pub struct GenericTimer;

impl GenericTimer {
    fn ticks() -> u64 {
        let (lo, hi): (u32, u32);
        // SAFETY: CNTPCT is readable from PL1.
        unsafe {
            asm!(
                "isb",
                "mrrc p15, 0, {}, {}, c14",
                out(reg) lo,
                out(reg) hi,
                options(nomem, nostack, preserves_flags)
            )
        };
        (u64::from(hi) << 32) | u64::from(lo)
    }

    fn frequency() -> u32 {
        mrc!("0", "c14", "c0", "0")
    }
}

impl ClockOps for GenericTimer {
    fn cpu_clock(&self, _cpu: CpuId) -> u64 {
        let freq = u128::from(Self::frequency().max(1));
        (u128::from(Self::ticks()) * 1_000_000_000 / freq) as u64
    }
}

// =============================================================================
// Caches
// =============================================================================

/// Clean and invalidate every data cache level up to the level of
/// coherency, by set/way.
pub fn flush_dcache_all() {
    dsb();
    let clidr = mrc!("1", "c0", "c0", "1");
    let loc = (clidr >> 24) & 0x7;

    for level in 0..loc {
        let ctype = (clidr >> (level * 3)) & 0x7;
        // 0 none, 1 instruction only
        if ctype < 2 {
            continue;
        }

        mcr!("2", "c0", "c0", "0", level << 1);
        isb();
        let ccsidr = mrc!("1", "c0", "c0", "0");

        let line_shift = (ccsidr & 0x7) + 4;
        let max_way = (ccsidr >> 3) & 0x3ff;
        let max_set = (ccsidr >> 13) & 0x7fff;
        let way_shift = max_way.leading_zeros();

        for way in 0..=max_way {
            let way_bits = if way_shift < 32 { way << way_shift } else { 0 };
            for set in 0..=max_set {
                mcr!("0", "c7", "c14", "2", way_bits | (set << line_shift) | (level << 1));
            }
        }
    }

    mcr!("2", "c0", "c0", "0", 0);
    dsb();
    isb();
}

/// Inner caches by set/way. Cortex-A15 keeps its L2 inside the level of
/// coherency, so there is no separate outer cache to maintain.
pub struct ArmV7Cache;

impl CacheOps for ArmV7Cache {
    fn flush_inner(&self) {
        flush_dcache_all();
        // ICIALLU
        mcr!("0", "c7", "c5", "0", 0);
        dsb();
        isb();
    }

    fn flush_outer(&self) {
        dsb();
    }
}
