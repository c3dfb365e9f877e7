//! Per-CPU scheduling/interrupt/work/timer trace rings.
//!
//! [`SchedLog`] is the always-on flight recorder. Hot paths call
//! [`SchedLog::record`] with the CPU they run on; the record is timestamped
//! with that CPU's clock and dropped into the CPU's ring for the event kind.
//!
//! # Halting
//!
//! The failure path calls [`SchedLog::halt`] once. From then on every
//! `record` call returns before reading the clock or touching a ring, so the
//! rings keep the state leading up to the failure.
//!
//! # Zero state
//!
//! All fields are atomics, and an all-zero `SchedLog` is identical to
//! [`SchedLog::new`]: every kind enabled, not halted, every ring empty.

pub mod buffer;
pub mod record;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::arch::ClockOps;
use crate::config::DebugConfig;
use crate::fmtbuf::fixed_fmt;
use crate::per_cpu;
use crate::percpu::{CpuId, PerCpu, MAX_CPUS};

pub use buffer::RingBuffer;
pub use record::{AuxRecord, IrqRecord, Record, TaskRecord, TimerRecord, WorkRecord, AUX_WORDS};

// =============================================================================
// Configuration
// =============================================================================

/// Records per CPU per kind.
pub const SCHED_LOG_MAX: usize = 2048;

/// Records in the shared auxiliary ring.
pub const AUX_LOG_MAX: usize = 128;

const _: () = assert!(
    SCHED_LOG_MAX.is_power_of_two(),
    "SCHED_LOG_MAX must be a power of 2"
);
const _: () = assert!(AUX_LOG_MAX.is_power_of_two(), "AUX_LOG_MAX must be a power of 2");

pub type TaskRing = RingBuffer<TaskRecord, SCHED_LOG_MAX, 4>;
pub type IrqRing = RingBuffer<IrqRecord, SCHED_LOG_MAX, 3>;
pub type WorkRing = RingBuffer<WorkRecord, SCHED_LOG_MAX, 5>;
pub type TimerRing = RingBuffer<TimerRecord, SCHED_LOG_MAX, 3>;
pub type AuxRing = RingBuffer<AuxRecord, AUX_LOG_MAX, AUX_WORDS>;

/// The trace streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogKind {
    Task = 0,
    Irq = 1,
    Work = 2,
    Timer = 3,
    Aux = 4,
    IrqExit = 5,
}

impl LogKind {
    #[inline(always)]
    const fn bit(self) -> u32 {
        1 << self as u8
    }
}

/// Streams of the auxiliary log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    /// CPU or bus clock switched.
    CpuBusClockChange,
}

/// Something worth recording.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// The CPU switched to this task.
    TaskSwitch { comm: &'a str, pid: i32 },
    /// Free-form marker in the task stream.
    Marker(&'a str),
    Irq { irq: u32, handler: usize, flag: i32 },
    Work { worker: usize, work: usize, func: usize, flag: i32 },
    Timer { kind: u32, func: usize },
}

impl Event<'_> {
    fn kind(&self) -> LogKind {
        match self {
            Event::TaskSwitch { .. } | Event::Marker(_) => LogKind::Task,
            Event::Irq { .. } => LogKind::Irq,
            Event::Work { .. } => LogKind::Work,
            Event::Timer { .. } => LogKind::Timer,
        }
    }
}

// =============================================================================
// SchedLog
// =============================================================================

/// All trace rings plus the halt latch.
pub struct SchedLog {
    task: PerCpu<TaskRing>,
    irq: PerCpu<IrqRing>,
    work: PerCpu<WorkRing>,
    timer: PerCpu<TimerRing>,
    irq_exit: PerCpu<AtomicU64>,
    aux: AuxRing,
    /// Bits of [`LogKind`] that are switched off.
    disabled: AtomicU32,
    halted: AtomicBool,
}

impl SchedLog {
    pub const fn new() -> Self {
        Self {
            task: per_cpu!(TaskRing::new()),
            irq: per_cpu!(IrqRing::new()),
            work: per_cpu!(WorkRing::new()),
            timer: per_cpu!(TimerRing::new()),
            irq_exit: per_cpu!(AtomicU64::new(0)),
            aux: AuxRing::new(),
            disabled: AtomicU32::new(0),
            halted: AtomicBool::new(false),
        }
    }

    /// Apply the stream switches from `config`.
    pub fn configure(&self, config: &DebugConfig) {
        let mut off = 0;
        for (enabled, kind) in [
            (config.sched_log, LogKind::Task),
            (config.sched_log, LogKind::Irq),
            (config.sched_log, LogKind::Work),
            (config.sched_log && config.timer_log, LogKind::Timer),
            (config.aux_log, LogKind::Aux),
            (config.irq_exit_log, LogKind::IrqExit),
        ] {
            if !enabled {
                off |= kind.bit();
            }
        }
        self.disabled.store(off, Ordering::Relaxed);
    }

    #[inline(always)]
    fn accepts(&self, kind: LogKind) -> bool {
        !self.is_halted() && self.disabled.load(Ordering::Relaxed) & kind.bit() == 0
    }

    /// Record `event` on `cpu`'s ring for its kind.
    #[inline]
    pub fn record(&self, cpu: CpuId, clock: &dyn ClockOps, event: Event<'_>) {
        if !self.accepts(event.kind()) {
            return;
        }
        let time = clock.cpu_clock(cpu);
        match event {
            Event::TaskSwitch { comm, pid } => {
                self.task.get(cpu).push(&TaskRecord::switch_to(time, comm, pid));
            }
            Event::Marker(msg) => {
                self.task.get(cpu).push(&TaskRecord::marker(time, msg));
            }
            Event::Irq { irq, handler, flag } => {
                self.irq.get(cpu).push(&IrqRecord { time, irq, handler, flag });
            }
            Event::Work { worker, work, func, flag } => {
                self.work.get(cpu).push(&WorkRecord { time, worker, work, func, flag });
            }
            Event::Timer { kind, func } => {
                self.timer.get(cpu).push(&TimerRecord { time, kind, func });
            }
        }
    }

    /// Append a formatted message to the auxiliary ring for `kind`.
    pub fn aux(&self, cpu: CpuId, clock: &dyn ClockOps, kind: AuxKind, args: fmt::Arguments<'_>) {
        if !self.accepts(LogKind::Aux) {
            return;
        }
        let time = clock.cpu_clock(cpu);
        let ring = match kind {
            AuxKind::CpuBusClockChange => &self.aux,
        };
        ring.push(&AuxRecord {
            time,
            cpu: cpu.index() as u32,
            text: fixed_fmt(args),
        });
    }

    /// Stamp the time `cpu` last left interrupt context.
    #[inline]
    pub fn irq_exit(&self, cpu: CpuId, clock: &dyn ClockOps) {
        if !self.accepts(LogKind::IrqExit) {
            return;
        }
        self.irq_exit.get(cpu).store(clock.cpu_clock(cpu), Ordering::Relaxed);
    }

    pub fn last_irq_exit(&self, cpu: CpuId) -> u64 {
        self.irq_exit.get(cpu).load(Ordering::Relaxed)
    }

    /// Latch logging off. Idempotent.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Wrapping byte sum over every task, irq, work and timer slot.
    ///
    /// Ring cursors are excluded.
    pub fn checksum(&self) -> u32 {
        let mut sum = 0u32;
        for cpu in CpuId::all() {
            sum = sum
                .wrapping_add(self.task.get(cpu).byte_sum())
                .wrapping_add(self.irq.get(cpu).byte_sum())
                .wrapping_add(self.work.get(cpu).byte_sum())
                .wrapping_add(self.timer.get(cpu).byte_sum());
        }
        sum
    }

    pub fn task(&self, cpu: CpuId) -> &TaskRing {
        self.task.get(cpu)
    }

    pub fn irq(&self, cpu: CpuId) -> &IrqRing {
        self.irq.get(cpu)
    }

    pub fn work(&self, cpu: CpuId) -> &WorkRing {
        self.work.get(cpu)
    }

    pub fn timer(&self, cpu: CpuId) -> &TimerRing {
        self.timer.get(cpu)
    }

    pub fn aux_ring(&self) -> &AuxRing {
        &self.aux
    }

    pub const fn nr_cpus(&self) -> usize {
        MAX_CPUS
    }
}

impl Default for SchedLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU64;

    struct TickClock(AtomicU64);

    impl ClockOps for TickClock {
        fn cpu_clock(&self, _cpu: CpuId) -> u64 {
            self.0.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    fn cpu(i: usize) -> CpuId {
        CpuId::new(i).unwrap()
    }

    #[test]
    fn records_land_on_the_named_cpu() {
        static LOG: SchedLog = SchedLog::new();
        let clock = TickClock(AtomicU64::new(0));

        LOG.record(cpu(1), &clock, Event::TaskSwitch { comm: "swapper/1", pid: 0 });
        LOG.record(cpu(1), &clock, Event::Irq { irq: 33, handler: 0xc010_0000, flag: 1 });
        LOG.record(cpu(3), &clock, Event::Timer { kind: 2, func: 0xc020_0000 });

        assert_eq!(LOG.task(cpu(1)).len(), 1);
        assert_eq!(LOG.task(cpu(0)).len(), 0);
        assert_eq!(LOG.irq(cpu(1)).latest().unwrap().irq, 33);
        assert_eq!(LOG.timer(cpu(3)).latest().unwrap().time, 3);
    }

    #[test]
    fn halted_log_is_frozen() {
        static LOG: SchedLog = SchedLog::new();
        let clock = TickClock(AtomicU64::new(0));

        for pid in 0..10 {
            LOG.record(cpu(0), &clock, Event::TaskSwitch { comm: "worker", pid });
        }
        let before = LOG.checksum();
        let cursor = LOG.task(cpu(0)).cursor();

        LOG.halt();
        LOG.halt();
        LOG.record(cpu(0), &clock, Event::TaskSwitch { comm: "late", pid: 99 });
        LOG.record(cpu(2), &clock, Event::Work { worker: 1, work: 2, func: 3, flag: 0 });
        LOG.aux(cpu(0), &clock, AuxKind::CpuBusClockChange, format_args!("late aux"));
        LOG.irq_exit(cpu(0), &clock);

        assert_eq!(LOG.task(cpu(0)).cursor(), cursor);
        assert_eq!(LOG.checksum(), before);
        assert!(LOG.aux_ring().is_empty());
        assert_eq!(LOG.last_irq_exit(cpu(0)), 0);
        assert_eq!(clock.0.load(Ordering::Relaxed), 10, "clock read after halt");
    }

    #[test]
    fn disabled_timer_stream_drops_only_timers() {
        static LOG: SchedLog = SchedLog::new();
        let clock = TickClock(AtomicU64::new(0));
        let config = DebugConfig {
            timer_log: false,
            ..DebugConfig::new()
        };
        LOG.configure(&config);

        LOG.record(cpu(0), &clock, Event::Timer { kind: 0, func: 1 });
        LOG.record(cpu(0), &clock, Event::Marker("resume"));

        assert!(LOG.timer(cpu(0)).is_empty());
        assert!(LOG.task(cpu(0)).latest().unwrap().is_marker());
    }

    #[test]
    fn checksum_is_byte_sum_of_slots() {
        static LOG: SchedLog = SchedLog::new();
        let clock = TickClock(AtomicU64::new(0));
        assert_eq!(LOG.checksum(), 0);

        LOG.record(cpu(2), &clock, Event::Timer { kind: 0x0102, func: 0x0300 });
        // time 1, kind bytes 0x02 + 0x01, func byte 0x03
        assert_eq!(LOG.checksum(), 1 + 2 + 1 + 3);
    }

    #[test]
    fn aux_text_is_truncated_and_tagged() {
        static LOG: SchedLog = SchedLog::new();
        let clock = TickClock(AtomicU64::new(0));
        let long = [b'x'; 300];
        let long = core::str::from_utf8(&long).unwrap();

        LOG.aux(cpu(2), &clock, AuxKind::CpuBusClockChange, format_args!("dvfs {}", long));
        let rec = LOG.aux_ring().latest().unwrap();
        assert_eq!(rec.cpu, 2);
        assert_eq!(rec.text().len(), 127);
        assert!(rec.text().starts_with(b"dvfs xx"));
    }
}
