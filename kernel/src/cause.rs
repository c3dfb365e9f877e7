//! Upload causes: why the board is about to be reset into the dump loader.
//!
//! The cause is kept per CPU in memory and mirrored into the always-on
//! scratch registers, where it survives even a supply-rail reset.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{BoardOps, InformReg};
use crate::per_cpu;
use crate::percpu::{CpuId, PerCpu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum UploadCause {
    /// Written at boot when the recorder arms itself.
    Init = 0xCAFE_BABE,
    KernelPanic = 0x0000_00C8,
    /// Requested by the user (crash keys).
    ForcedUpload = 0x0000_0022,
    /// The modem reported a fatal error.
    CpErrorFatal = 0x0000_00CC,
    UserFault = 0x0000_002F,
    HsicDisconnected = 0x0000_00DD,
}

impl UploadCause {
    /// Classify a panic reason.
    pub fn classify(reason: &str) -> Self {
        match reason {
            "User Fault" => UploadCause::UserFault,
            "Crash Key" => UploadCause::ForcedUpload,
            "HSIC Disconnected" => UploadCause::HsicDisconnected,
            r if r.starts_with("CP Crash") => UploadCause::CpErrorFatal,
            _ => UploadCause::KernelPanic,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        [
            UploadCause::Init,
            UploadCause::KernelPanic,
            UploadCause::ForcedUpload,
            UploadCause::CpErrorFatal,
            UploadCause::UserFault,
            UploadCause::HsicDisconnected,
        ]
        .into_iter()
        .find(|cause| *cause as u32 == raw)
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for UploadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadCause::Init => "init",
            UploadCause::KernelPanic => "kernel panic",
            UploadCause::ForcedUpload => "forced upload",
            UploadCause::CpErrorFatal => "cp fatal error",
            UploadCause::UserFault => "user fault",
            UploadCause::HsicDisconnected => "hsic disconnected",
        };
        write!(f, "{} ({:#x})", name, self.raw())
    }
}

/// Per-CPU record of the last cause set on each CPU.
pub struct UploadCauses {
    per_cpu: PerCpu<AtomicU32>,
}

impl UploadCauses {
    pub const fn new() -> Self {
        Self {
            per_cpu: per_cpu!(AtomicU32::new(0)),
        }
    }

    /// Record `cause` for `cpu` and mirror it to the scratch registers.
    pub fn set(&self, cpu: CpuId, cause: UploadCause, board: &dyn BoardOps) {
        self.per_cpu.get(cpu).store(cause.raw(), Ordering::Relaxed);
        for reg in InformReg::UPLOAD_CAUSE_MIRRORS {
            board.write_inform(reg, cause.raw());
        }
        log::error!("upload cause {} on {}", cause, cpu);
    }

    pub fn get(&self, cpu: CpuId) -> Option<UploadCause> {
        UploadCause::from_raw(self.per_cpu.get(cpu).load(Ordering::Relaxed))
    }
}

impl Default for UploadCauses {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_causes() {
        assert_eq!(UploadCause::classify("User Fault"), UploadCause::UserFault);
        assert_eq!(UploadCause::classify("Crash Key"), UploadCause::ForcedUpload);
        assert_eq!(UploadCause::classify("CP Crash: subsystem X"), UploadCause::CpErrorFatal);
        assert_eq!(UploadCause::classify("HSIC Disconnected"), UploadCause::HsicDisconnected);
        assert_eq!(UploadCause::classify("oops: null pointer"), UploadCause::KernelPanic);
    }

    #[test]
    fn exact_tags_do_not_match_prefixes() {
        assert_eq!(UploadCause::classify("User Fault!"), UploadCause::KernelPanic);
        assert_eq!(UploadCause::classify("Crash Keys"), UploadCause::KernelPanic);
        assert_eq!(UploadCause::classify("CP Cras"), UploadCause::KernelPanic);
    }

    #[test]
    fn raw_values_round_trip() {
        assert_eq!(UploadCause::from_raw(0xCAFE_BABE), Some(UploadCause::Init));
        assert_eq!(UploadCause::from_raw(0xC8), Some(UploadCause::KernelPanic));
        assert_eq!(UploadCause::from_raw(0), None);
    }
}
