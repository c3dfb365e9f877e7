//! Byte layout of the persistent region.
//!
//! ```text
//! 0x0000  u32 LE   magic
//! 0x0004  [u8]     reason text, NUL padded, no terminator when full
//! 0x0400  [u8]     kernel-log tail, NUL padded
//! 0x4000  u32 LE   duplicate magic
//! ```
//!
//! The encode helpers are what the recorder writes with; [`RegionImage`] is
//! the decode side a recovery tool (or a test) uses on a copy of the window.

use core::fmt;

use crate::fmtbuf::until_nul;

pub const MAGIC_OFFSET: usize = 0x0;
pub const REASON_OFFSET: usize = 0x4;
pub const LOG_OFFSET: usize = 0x400;
pub const MAGIC_COPY_OFFSET: usize = 0x4000;

/// Capacity of the reason slot.
pub const REASON_LEN: usize = LOG_OFFSET - REASON_OFFSET;

/// Capacity of the kernel-log slot.
pub const LOG_LEN: usize = 0x1000 - LOG_OFFSET;

/// Bytes covered by the window, duplicate magic included.
pub const REGION_SIZE: usize = MAGIC_COPY_OFFSET + 4;

/// Magic written when the board is armed or has crashed.
pub const PANIC_MAGIC: u32 = 0x6626_2564;

/// Magic written on an orderly reboot.
pub const CLEAN_MAGIC: u32 = 0;

const _: () = assert!(REASON_LEN == 1020);
const _: () = assert!(LOG_LEN == 3072);
const _: () = assert!(LOG_OFFSET + LOG_LEN <= MAGIC_COPY_OFFSET);

pub fn encode_magic(magic: u32) -> [u8; 4] {
    magic.to_le_bytes()
}

/// Fixed-slot copy of `reason`: truncated to the slot, zero-filled after.
pub fn encode_reason(reason: &[u8]) -> [u8; REASON_LEN] {
    let mut slot = [0u8; REASON_LEN];
    let len = reason.len().min(REASON_LEN);
    slot[..len].copy_from_slice(&reason[..len]);
    slot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The buffer is shorter than the window.
    Truncated { len: usize },
    /// The two magic copies differ: the last write was torn.
    MagicMismatch { primary: u32, copy: u32 },
    /// An output buffer is too small for the encoded data.
    BufferTooSmall { needed: usize, got: usize },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::Truncated { len } => {
                write!(f, "region image is {} bytes, need {}", len, REGION_SIZE)
            }
            RegionError::MagicMismatch { primary, copy } => {
                write!(f, "magic mismatch: {:#010x} at head, {:#010x} at tail", primary, copy)
            }
            RegionError::BufferTooSmall { needed, got } => {
                write!(f, "buffer too small: need {} bytes, got {}", needed, got)
            }
        }
    }
}

/// What the magic says about the previous boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Orderly reboot; nothing to upload.
    Clean,
    /// Armed or crashed; the boot loader consults the upload cause.
    UploadPending,
    /// Anything else (never written by the recorder).
    Unknown(u32),
}

/// Read-only view over a copy of the window.
#[derive(Debug, Clone, Copy)]
pub struct RegionImage<'a> {
    bytes: &'a [u8],
}

impl<'a> RegionImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, RegionError> {
        if bytes.len() < REGION_SIZE {
            return Err(RegionError::Truncated { len: bytes.len() });
        }
        Ok(Self {
            bytes: &bytes[..REGION_SIZE],
        })
    }

    fn word(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    pub fn magic(&self) -> u32 {
        self.word(MAGIC_OFFSET)
    }

    pub fn magic_copy(&self) -> u32 {
        self.word(MAGIC_COPY_OFFSET)
    }

    /// The agreed magic, or the mismatch.
    pub fn validate(&self) -> Result<u32, RegionError> {
        let (primary, copy) = (self.magic(), self.magic_copy());
        if primary == copy {
            Ok(primary)
        } else {
            Err(RegionError::MagicMismatch { primary, copy })
        }
    }

    pub fn state(&self) -> Result<RegionState, RegionError> {
        Ok(match self.validate()? {
            CLEAN_MAGIC => RegionState::Clean,
            PANIC_MAGIC => RegionState::UploadPending,
            other => RegionState::Unknown(other),
        })
    }

    /// Reason bytes up to the first NUL or the end of the slot.
    pub fn reason(&self) -> &'a [u8] {
        until_nul(&self.bytes[REASON_OFFSET..REASON_OFFSET + REASON_LEN])
    }

    /// Kernel-log tail up to the first NUL.
    pub fn log_tail(&self) -> &'a [u8] {
        until_nul(&self.bytes[LOG_OFFSET..LOG_OFFSET + LOG_LEN])
    }
}
