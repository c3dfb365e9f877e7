//! Record types stored in the ring logs.
//!
//! Each record packs into a fixed number of `u64` words so a ring slot can be
//! written with plain relaxed atomic stores. Readers may observe a torn record
//! while its slot is being overwritten; that is accepted.

use crate::fmtbuf::{fixed_cstr, until_nul};

/// Length of a task command name, including the terminating NUL.
pub const TASK_COMM_LEN: usize = 16;

/// Length of an auxiliary log message, including the terminating NUL.
pub const AUX_TEXT_LEN: usize = 128;

/// A record that can be stored in `W` words.
pub trait Record<const W: usize>: Copy {
    fn encode(&self) -> [u64; W];
    fn decode(words: &[u64; W]) -> Self;
}

#[inline(always)]
fn pack8(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

fn pack_text(text: &[u8], out: &mut [u64]) {
    for (word, chunk) in out.iter_mut().zip(text.chunks_exact(8)) {
        *word = pack8(chunk);
    }
}

fn unpack_text<const N: usize>(words: &[u64]) -> [u8; N] {
    let mut text = [0u8; N];
    for (chunk, word) in text.chunks_exact_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    text
}

// =============================================================================
// Task switches
// =============================================================================

/// A context switch, or a free-form marker in the task stream.
///
/// Markers carry `pid == -1` and the message text in `comm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRecord {
    pub time: u64,
    pub comm: [u8; TASK_COMM_LEN],
    pub pid: i32,
}

impl TaskRecord {
    pub const MARKER_PID: i32 = -1;

    pub fn switch_to(time: u64, comm: &str, pid: i32) -> Self {
        Self {
            time,
            comm: fixed_cstr(comm.as_bytes()),
            pid,
        }
    }

    pub fn marker(time: u64, msg: &str) -> Self {
        Self {
            time,
            comm: fixed_cstr(msg.as_bytes()),
            pid: Self::MARKER_PID,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.pid == Self::MARKER_PID
    }

    pub fn comm(&self) -> &[u8] {
        until_nul(&self.comm)
    }
}

impl Record<4> for TaskRecord {
    fn encode(&self) -> [u64; 4] {
        let mut words = [self.time, 0, 0, self.pid as u32 as u64];
        pack_text(&self.comm, &mut words[1..3]);
        words
    }

    fn decode(words: &[u64; 4]) -> Self {
        Self {
            time: words[0],
            comm: unpack_text(&words[1..3]),
            pid: words[3] as u32 as i32,
        }
    }
}

// =============================================================================
// Interrupts
// =============================================================================

/// An interrupt handler entry or exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqRecord {
    pub time: u64,
    pub irq: u32,
    pub handler: usize,
    /// Caller-defined entry/exit marker.
    pub flag: i32,
}

impl Record<3> for IrqRecord {
    fn encode(&self) -> [u64; 3] {
        [
            self.time,
            self.handler as u64,
            (self.irq as u64) | ((self.flag as u32 as u64) << 32),
        ]
    }

    fn decode(words: &[u64; 3]) -> Self {
        Self {
            time: words[0],
            handler: words[1] as usize,
            irq: words[2] as u32,
            flag: (words[2] >> 32) as u32 as i32,
        }
    }
}

// =============================================================================
// Work items
// =============================================================================

/// A work item picked up (or finished) by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRecord {
    pub time: u64,
    pub worker: usize,
    pub work: usize,
    pub func: usize,
    pub flag: i32,
}

impl Record<5> for WorkRecord {
    fn encode(&self) -> [u64; 5] {
        [
            self.time,
            self.worker as u64,
            self.work as u64,
            self.func as u64,
            self.flag as u32 as u64,
        ]
    }

    fn decode(words: &[u64; 5]) -> Self {
        Self {
            time: words[0],
            worker: words[1] as usize,
            work: words[2] as usize,
            func: words[3] as usize,
            flag: words[4] as u32 as i32,
        }
    }
}

// =============================================================================
// Timers
// =============================================================================

/// A timer callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRecord {
    pub time: u64,
    /// Caller-defined timer kind.
    pub kind: u32,
    pub func: usize,
}

impl Record<3> for TimerRecord {
    fn encode(&self) -> [u64; 3] {
        [self.time, self.kind as u64, self.func as u64]
    }

    fn decode(words: &[u64; 3]) -> Self {
        Self {
            time: words[0],
            kind: words[1] as u32,
            func: words[2] as usize,
        }
    }
}

// =============================================================================
// Auxiliary text
// =============================================================================

/// A short formatted message from a subsystem (clock changes, governors...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxRecord {
    pub time: u64,
    pub cpu: u32,
    pub text: [u8; AUX_TEXT_LEN],
}

/// Words needed for an [`AuxRecord`].
pub const AUX_WORDS: usize = 2 + AUX_TEXT_LEN / 8;

impl AuxRecord {
    pub fn text(&self) -> &[u8] {
        until_nul(&self.text)
    }
}

impl Record<AUX_WORDS> for AuxRecord {
    fn encode(&self) -> [u64; AUX_WORDS] {
        let mut words = [0u64; AUX_WORDS];
        words[0] = self.time;
        words[1] = self.cpu as u64;
        pack_text(&self.text, &mut words[2..]);
        words
    }

    fn decode(words: &[u64; AUX_WORDS]) -> Self {
        Self {
            time: words[0],
            cpu: words[1] as u32,
            text: unpack_text(&words[2..]),
        }
    }
}

const _: () = assert!(TASK_COMM_LEN % 8 == 0 && AUX_TEXT_LEN % 8 == 0);
