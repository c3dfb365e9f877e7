//! Runtime switches exposed to user space.
//!
//! The enable level is one 32-bit word: the low half gates kernel-fault
//! handling (panic path, crash keys), the high half gates user-fault
//! handling. Both halves can be written independently or as a whole.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Default level: kernel faults handled, user faults ignored.
pub const DEFAULT_LEVEL: u32 = 0x0000_0001;

/// Both halves enabled.
pub const LEVEL_ALL: u32 = 0x0001_0001;

/// Why the previous boot ended, as reported by the boot loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResetReason {
    Software = 1,
    Watchdog = 2,
    Debug = 3,
    Kernel = 4,
    Modem = 5,
    Power = 6,
    Recovery = 7,
    Bootloader = 8,
    Unknown = 9,
}

impl ResetReason {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ResetReason::Software,
            2 => ResetReason::Watchdog,
            3 => ResetReason::Debug,
            4 => ResetReason::Kernel,
            5 => ResetReason::Modem,
            6 => ResetReason::Power,
            7 => ResetReason::Recovery,
            8 => ResetReason::Bootloader,
            _ => ResetReason::Unknown,
        }
    }

    /// Four-letter token shown to user space.
    pub const fn token(self) -> &'static str {
        match self {
            ResetReason::Software => "SPON",
            ResetReason::Watchdog => "WPON",
            ResetReason::Debug => "DPON",
            ResetReason::Kernel => "KPON",
            ResetReason::Modem => "MPON",
            ResetReason::Power => "PPON",
            ResetReason::Recovery => "RPON",
            ResetReason::Bootloader => "BPON",
            ResetReason::Unknown => "NPON",
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

pub struct Tunables {
    level: AtomicU32,
    reset_reason: AtomicU32,
}

impl Tunables {
    pub const fn new() -> Self {
        Self::with_level(DEFAULT_LEVEL)
    }

    pub const fn with_level(level: u32) -> Self {
        Self {
            level: AtomicU32::new(level),
            reset_reason: AtomicU32::new(ResetReason::Unknown as u32),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Relaxed)
    }

    pub fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Relaxed);
    }

    /// Low half: kernel-fault handling.
    pub fn enable(&self) -> u16 {
        self.level() as u16
    }

    /// High half: user-fault handling.
    pub fn enable_user(&self) -> u16 {
        (self.level() >> 16) as u16
    }

    pub fn set_enable(&self, value: u16) {
        self.update_half(0, value);
    }

    pub fn set_enable_user(&self, value: u16) {
        self.update_half(16, value);
    }

    fn update_half(&self, shift: u32, value: u16) {
        let mask = 0xffffu32 << shift;
        let _ = self
            .level
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |level| {
                Some((level & !mask) | ((value as u32) << shift))
            });
    }

    #[inline(always)]
    pub fn kernel_fault_enabled(&self) -> bool {
        self.enable() != 0
    }

    #[inline(always)]
    pub fn user_fault_enabled(&self) -> bool {
        self.enable_user() != 0
    }

    pub fn set_reset_reason(&self, raw: u32) {
        self.reset_reason.store(raw, Ordering::Relaxed);
    }

    pub fn reset_reason(&self) -> ResetReason {
        ResetReason::from_raw(self.reset_reason.load(Ordering::Relaxed))
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_are_written_independently() {
        let t = Tunables::new();
        assert!(t.kernel_fault_enabled());
        assert!(!t.user_fault_enabled());

        t.set_enable_user(1);
        assert_eq!(t.level(), LEVEL_ALL);

        t.set_enable(0);
        assert_eq!(t.level(), 0x0001_0000);
        assert!(!t.kernel_fault_enabled());
        assert!(t.user_fault_enabled());
    }

    #[test]
    fn reset_reason_tokens() {
        let t = Tunables::new();
        assert_eq!(t.reset_reason().token(), "NPON");
        t.set_reset_reason(2);
        assert_eq!(t.reset_reason().token(), "WPON");
        t.set_reset_reason(8);
        assert_eq!(t.reset_reason().token(), "BPON");
        t.set_reset_reason(0);
        assert_eq!(t.reset_reason().token(), "NPON");
    }
}
