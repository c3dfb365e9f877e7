//! Per-CPU state addressed by an explicit CPU index.
//!
//! Nothing in this crate asks "which processor am I on". Every caller names
//! the CPU it acts for with a [`CpuId`], and the storage behind it is a fixed
//! array sized by [`MAX_CPUS`], laid out so that neighbouring CPUs do not
//! share a cache line.

use core::fmt;

/// Number of CPUs the recorder keeps state for.
pub const MAX_CPUS: usize = 4;

/// A validated CPU index (always `< MAX_CPUS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u8);

impl CpuId {
    /// The boot CPU.
    pub const BOOT: CpuId = CpuId(0);

    /// Validate a raw CPU index.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_CPUS {
            Some(CpuId(index as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterate over every CPU slot.
    pub fn all() -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).map(|i| CpuId(i as u8))
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU{}", self.0)
    }
}

/// Cache-line aligned wrapper, one per CPU slot.
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Fixed per-CPU storage.
///
/// A `PerCpu<T>` is built once (usually in a `static`) and never resized.
/// Interior mutability, where needed, comes from `T` itself (atomics or a
/// `spin::Mutex`).
pub struct PerCpu<T> {
    slots: [CacheAligned<T>; MAX_CPUS],
}

impl<T> PerCpu<T> {
    pub const fn new(slots: [CacheAligned<T>; MAX_CPUS]) -> Self {
        Self { slots }
    }

    #[inline(always)]
    pub fn get(&self, cpu: CpuId) -> &T {
        &self.slots[cpu.index()].0
    }

    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        CpuId::all().zip(self.slots.iter().map(|slot| &slot.0))
    }
}

/// Build a `PerCpu` whose slots are all the same constant expression.
#[macro_export]
macro_rules! per_cpu {
    ($init:expr) => {
        $crate::percpu::PerCpu::new([const { $crate::percpu::CacheAligned($init) }; $crate::percpu::MAX_CPUS])
    };
}

const _: () = assert!(MAX_CPUS <= u8::MAX as usize, "CpuId stores the index in a u8");

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cpu_id_rejects_out_of_range() {
        assert!(CpuId::new(MAX_CPUS - 1).is_some());
        assert!(CpuId::new(MAX_CPUS).is_none());
        assert_eq!(CpuId::all().count(), MAX_CPUS);
    }

    #[test]
    fn slots_are_independent_and_aligned() {
        let counters: PerCpu<AtomicU32> = per_cpu!(AtomicU32::new(0));
        let cpu1 = CpuId::new(1).unwrap();
        counters.get(cpu1).fetch_add(3, Ordering::Relaxed);

        for (cpu, value) in counters.iter() {
            let expected = if cpu == cpu1 { 3 } else { 0 };
            assert_eq!(value.load(Ordering::Relaxed), expected);
        }
        assert_eq!(core::mem::align_of::<CacheAligned<AtomicU32>>(), 64);
    }
}
