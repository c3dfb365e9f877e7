//! Exynos 5 board services.
//!
//! The power-management unit (PMU) holds the software-reset register and the
//! INFORM scratch registers that survive a warm reset; the boot loader reads
//! INFORM3/4/6 to find the upload cause. The watchdog is the classic
//! S3C2410-style block.
//!
//! Register addresses (Exynos 5250):
//! - PMU: 0x1004_0000
//! - Watchdog: 0x101D_0000

use core::ptr::NonNull;

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use super::traits::{BoardOps, BusFloor, InformReg};

pub const PMU_PHYS: usize = 0x1004_0000;
pub const WATCHDOG_PHYS: usize = 0x101D_0000;

register_bitfields![u32,
    SWRESET [
        RESET OFFSET(0) NUMBITS(1) []
    ],
    WTCON [
        RESET OFFSET(0) NUMBITS(1) [],
        INTEN OFFSET(2) NUMBITS(1) [],
        ENABLE OFFSET(5) NUMBITS(1) []
    ]
];

register_structs! {
    pub PmuRegisters {
        (0x000 => _reserved0),
        (0x400 => swreset: WriteOnly<u32, SWRESET::Register>),
        (0x404 => _reserved1),
        (0x80C => inform3: ReadWrite<u32>),
        (0x810 => inform4: ReadWrite<u32>),
        (0x814 => inform5: ReadWrite<u32>),
        (0x818 => inform6: ReadWrite<u32>),
        (0x81C => @END),
    },

    pub WatchdogRegisters {
        (0x00 => wtcon: ReadWrite<u32, WTCON::Register>),
        (0x04 => wtdat: ReadWrite<u32>),
        (0x08 => wtcnt: ReadWrite<u32>),
        (0x0C => wtclrint: WriteOnly<u32>),
        (0x10 => @END),
    }
}

/// A PLL whose configuration word is logged on failure.
#[derive(Clone, Copy)]
pub struct PllTap {
    pub name: &'static str,
    pub con0: NonNull<ReadOnly<u32>>,
}

pub const NO_PLLS: &[PllTap] = &[];

pub struct Exynos5Board {
    pmu: NonNull<PmuRegisters>,
    wdt: NonNull<WatchdogRegisters>,
    plls: &'static [PllTap],
    /// Kernel virtual base of the linear map and the physical address it maps.
    linear_map: (usize, u64),
    bus_qos: Option<fn(BusFloor)>,
}

// SAFETY: every access is a single volatile MMIO read or write; the
// registers have no read-modify-write protocol shared between CPUs.
unsafe impl Send for Exynos5Board {}
unsafe impl Sync for Exynos5Board {}

impl Exynos5Board {
    /// # Safety
    ///
    /// `pmu` and `wdt` must map the PMU and watchdog register blocks, and
    /// every `PllTap` must point at a readable PLL register, for as long as
    /// the board value lives.
    pub const unsafe fn new(
        pmu: NonNull<PmuRegisters>,
        wdt: NonNull<WatchdogRegisters>,
        plls: &'static [PllTap],
        linear_map: (usize, u64),
    ) -> Self {
        Self {
            pmu,
            wdt,
            plls,
            linear_map,
            bus_qos: None,
        }
    }

    /// Hook the platform's bus-frequency QoS request.
    pub const fn with_bus_qos(mut self, request: fn(BusFloor)) -> Self {
        self.bus_qos = Some(request);
        self
    }

    fn pmu(&self) -> &PmuRegisters {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe { self.pmu.as_ref() }
    }

    fn wdt(&self) -> &WatchdogRegisters {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe { self.wdt.as_ref() }
    }

    /// INFORM5 as left by the boot loader.
    pub fn inform5(&self) -> u32 {
        self.pmu().inform5.get()
    }

    pub fn watchdog_count(&self) -> u32 {
        self.wdt().wtcnt.get()
    }
}

impl BoardOps for Exynos5Board {
    fn request_bus_floor(&self, floor: BusFloor) {
        match self.bus_qos {
            Some(request) => request(floor),
            None => log::warn!(
                "no bus QoS hook, MIF {} kHz / INT {} kHz not requested",
                floor.mif_khz,
                floor.int_khz
            ),
        }
    }

    fn disable_watchdog(&self) {
        self.wdt()
            .wtcon
            .write(WTCON::ENABLE::CLEAR + WTCON::INTEN::CLEAR + WTCON::RESET::CLEAR);
    }

    fn write_inform(&self, reg: InformReg, value: u32) {
        let pmu = self.pmu();
        match reg {
            InformReg::Inform3 => pmu.inform3.set(value),
            InformReg::Inform4 => pmu.inform4.set(value),
            InformReg::Inform6 => pmu.inform6.set(value),
        }
    }

    fn for_each_pll(&self, visit: &mut dyn FnMut(&'static str, u32)) {
        for tap in self.plls {
            // SAFETY: guaranteed by the contract of `new`.
            let value = unsafe { tap.con0.as_ref() }.get();
            visit(tap.name, value);
        }
    }

    fn virt_to_phys(&self, addr: usize) -> u64 {
        let (virt_base, phys_base) = self.linear_map;
        (addr.wrapping_sub(virt_base) as u64).wrapping_add(phys_base)
    }

    fn restart(&self) {
        self.pmu().swreset.write(SWRESET::RESET::SET);
    }
}
