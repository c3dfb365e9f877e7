//! Build-time/boot-time configuration of the recorder.
//!
//! A [`DebugConfig`] is resolved once, validated, and copied into each
//! component at construction. Runtime switches that user space may flip
//! live in [`crate::tunables`] instead.

use core::fmt;
use core::time::Duration;

use crate::arch::BusFloor;
use crate::region::{TailBudget, LOG_LEN};

/// What the failure path dumps about tasks before resetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Per-task table, CPU statistics, then the kernel's own state dump.
    FullTaskDump,
    /// Only the kernel's own state dump.
    BuiltinTaskState,
    /// Nothing.
    Skip,
}

/// How a manual crash is requested from the keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKeyPolicy {
    /// Hold volume-down with volume-up released, press power twice.
    Sequential,
    /// Hold both volume keys for [`DebugConfig::hold_delay`].
    SimultaneousHold,
    /// Drive a caller-supplied key table to its target state twice.
    KeyTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ZeroHoldDelay,
    ZeroPressCount,
    TailBudgetTooLarge { bytes: usize },
    ZeroTailLines,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroHoldDelay => write!(f, "crash key hold delay must be non-zero"),
            ConfigError::ZeroPressCount => write!(f, "crash key press count must be non-zero"),
            ConfigError::TailBudgetTooLarge { bytes } => {
                write!(f, "log tail budget {} exceeds the {}-byte slot", bytes, LOG_LEN)
            }
            ConfigError::ZeroTailLines => write!(f, "log tail line budget must be non-zero"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    /// Task, irq and work rings.
    pub sched_log: bool,
    /// Timer ring (needs `sched_log`).
    pub timer_log: bool,
    pub aux_log: bool,
    pub irq_exit_log: bool,
    /// Semaphore holder tracking.
    pub semaphore_log: bool,
    pub dump_mode: DumpMode,
    pub crash_key: CrashKeyPolicy,
    /// Presses of the trigger key (or table matches) that fire a crash.
    pub crash_key_presses: u32,
    pub hold_delay: Duration,
    /// Stop the watchdog before dumping.
    pub disable_watchdog: bool,
    /// Whether the user-fault control file exists.
    pub user_fault: bool,
    pub bus_floor: BusFloor,
    pub log_tail: TailBudget,
}

impl DebugConfig {
    pub const fn new() -> Self {
        Self {
            sched_log: true,
            timer_log: true,
            aux_log: true,
            irq_exit_log: true,
            semaphore_log: true,
            dump_mode: DumpMode::FullTaskDump,
            crash_key: CrashKeyPolicy::Sequential,
            crash_key_presses: 2,
            hold_delay: Duration::from_secs(3),
            disable_watchdog: true,
            user_fault: true,
            bus_floor: BusFloor::DEFAULT,
            log_tail: TailBudget::DEFAULT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_delay.is_zero() {
            return Err(ConfigError::ZeroHoldDelay);
        }
        if self.crash_key_presses == 0 {
            return Err(ConfigError::ZeroPressCount);
        }
        if self.log_tail.bytes > LOG_LEN {
            return Err(ConfigError::TailBudgetTooLarge {
                bytes: self.log_tail.bytes,
            });
        }
        if self.log_tail.lines == 0 {
            return Err(ConfigError::ZeroTailLines);
        }
        Ok(())
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(DebugConfig::new().validate(), Ok(()));
    }

    #[test]
    fn oversized_tail_is_rejected() {
        let config = DebugConfig {
            log_tail: TailBudget {
                bytes: LOG_LEN + 1,
                lines: 50,
            },
            ..DebugConfig::new()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TailBudgetTooLarge { bytes: LOG_LEN + 1 })
        );
    }

    #[test]
    fn zero_hold_delay_is_rejected() {
        let config = DebugConfig {
            hold_delay: Duration::ZERO,
            ..DebugConfig::new()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroHoldDelay));
    }
}
