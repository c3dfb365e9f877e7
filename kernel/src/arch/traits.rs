//! Hardware-facing traits for the recorder.
//!
//! These traits are the only way the recorder touches a CPU, a cache or the
//! board. The ARMv7 implementation lives in [`super::armv7`], the Exynos board
//! glue in [`super::exynos`], and the host-side simulator implements all of
//! them with a journal so tests can check what the failure path did.
//!
//! All methods take `&self` so implementations can be used as trait objects
//! from `'static` collaborators.

use crate::percpu::CpuId;
use crate::snapshot::{CoreRegs, MmuRegs};

/// Saved interrupt state returned by [`CpuOps::local_irq_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqFlags(pub u32);

/// Per-processor primitives.
pub trait CpuOps: Sync {
    /// Mask IRQs on the calling CPU. Never re-enabled by the recorder.
    fn local_irq_disable(&self);

    /// Mask IRQs and return the previous state.
    fn local_irq_save(&self) -> IrqFlags;

    /// Restore a state returned by [`CpuOps::local_irq_save`].
    fn local_irq_restore(&self, flags: IrqFlags);

    /// Fill `regs` with the calling CPU's general-purpose and banked registers.
    ///
    /// The mode is restored on return.
    fn save_core_regs(&self, regs: &mut CoreRegs);

    /// Fill `regs` with the calling CPU's CP15 memory-management registers.
    fn save_mmu_regs(&self, regs: &mut MmuRegs);

    /// Hint used inside busy loops.
    #[inline]
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Cache maintenance.
pub trait CacheOps: Sync {
    /// Clean and invalidate every level of the CPU-local caches.
    fn flush_inner(&self);

    /// Clean and invalidate the outer (system) cache, if any.
    fn flush_outer(&self);

    /// Both, inner first.
    fn flush_all(&self) {
        self.flush_inner();
        self.flush_outer();
    }
}

/// Per-CPU monotonic clock used to stamp ring-log records.
pub trait ClockOps: Sync {
    fn cpu_clock(&self, cpu: CpuId) -> u64;
}

/// Minimum bus frequencies requested while the failure path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFloor {
    /// Memory interface floor in kHz.
    pub mif_khz: u32,
    /// Internal bus floor in kHz.
    pub int_khz: u32,
}

impl BusFloor {
    pub const DEFAULT: BusFloor = BusFloor {
        mif_khz: 800_000,
        int_khz: 600_000,
    };
}

/// Power-management "inform" scratch registers the next boot stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformReg {
    Inform3,
    Inform4,
    Inform6,
}

impl InformReg {
    /// Registers that mirror the upload cause.
    pub const UPLOAD_CAUSE_MIRRORS: [InformReg; 3] =
        [InformReg::Inform3, InformReg::Inform4, InformReg::Inform6];
}

/// Board-level services.
pub trait BoardOps: Sync {
    /// Raise the bus-frequency floor so the dump completes quickly.
    fn request_bus_floor(&self, floor: BusFloor);

    /// Stop the hardware watchdog so a long dump is not cut short.
    fn disable_watchdog(&self);

    /// Write one of the persistent scratch registers.
    fn write_inform(&self, reg: InformReg, value: u32);

    /// Report PLL configuration registers by name.
    fn for_each_pll(&self, visit: &mut dyn FnMut(&'static str, u32)) {
        let _ = visit;
    }

    /// Translate a kernel virtual address for the layout descriptor.
    fn virt_to_phys(&self, addr: usize) -> u64 {
        addr as u64
    }

    /// Issue the hardware reset. On real hardware this does not return.
    fn restart(&self);
}
