//! Hardware abstraction.
//!
//! [`traits`] defines the seams. [`armv7`] provides the CPU side for 32-bit
//! ARM (only built for that target) and [`exynos`] the board side for
//! Exynos 5 parts.

pub mod traits;

#[cfg(target_arch = "arm")]
pub mod armv7;

pub mod exynos;

pub use traits::{BoardOps, BusFloor, CacheOps, ClockOps, CpuOps, InformReg, IrqFlags};
