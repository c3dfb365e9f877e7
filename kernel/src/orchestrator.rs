//! The failure path.
//!
//! ```text
//!   Armed --panic--> Diagnosing --> Frozen --> ResetPending --> (reset)
//! ```
//!
//! - **Armed**: normal operation. The only state with an outgoing edge back
//!   to the caller: a disabled recorder abstains here.
//! - **Diagnosing**: bus floor raised, local IRQs masked, logging halted,
//!   magic and reason persisted, upload cause classified, watchdog stopped.
//! - **Frozen**: optional extended dump (best effort).
//! - **ResetPending**: register snapshot of this CPU, cache flush, hardware
//!   reset. [`FailureOrchestrator::reset`] returns `!`; if the board ever
//!   comes back from the reset request the CPU spins logging forever.
//!
//! Other CPUs are not stopped. They stop adding trace records once the log
//! is halted, but a record in flight on another CPU may still land.
//!
//! # Re-entry
//!
//! Only the first CPU to fail runs the sequence. A later failure on the same
//! CPU (a fault inside the dump) jumps straight to the reset; a failure on
//! another CPU saves that CPU's registers and parks it.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::arch::{BoardOps, CacheOps, ClockOps, CpuOps};
use crate::cause::{UploadCause, UploadCauses};
use crate::config::DebugConfig;
use crate::dump::{self, KernelIntrospection};
use crate::notifier::{DumpReason, KmsgDumper, NotifyVerdict, PanicNotifier, RebootNotifier};
use crate::percpu::CpuId;
use crate::region::{PersistentRegion, RegionMemory, CLEAN_MAGIC, PANIC_MAGIC};
use crate::ringlog::SchedLog;
use crate::snapshot::SnapshotStore;
use crate::tunables::Tunables;

/// The hardware and kernel collaborators the failure path drives.
#[derive(Clone, Copy)]
pub struct Platform<'a> {
    pub cpu: &'a dyn CpuOps,
    pub cache: &'a dyn CacheOps,
    pub clock: &'a dyn ClockOps,
    pub board: &'a dyn BoardOps,
    pub kernel: &'a dyn KernelIntrospection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FailureState {
    Armed = 0,
    Diagnosing = 1,
    Frozen = 2,
    ResetPending = 3,
}

impl FailureState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => FailureState::Armed,
            1 => FailureState::Diagnosing,
            2 => FailureState::Frozen,
            _ => FailureState::ResetPending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// Regular panic notifier.
    Notified,
    /// Current-task state is not trusted.
    Safe,
}

const NO_OWNER: u8 = u8::MAX;

pub struct FailureOrchestrator<'a> {
    config: DebugConfig,
    tunables: &'a Tunables,
    log: &'a SchedLog,
    region: PersistentRegion<'a>,
    platform: Platform<'a>,
    snapshots: SnapshotStore,
    causes: UploadCauses,
    state: AtomicU8,
    owner: AtomicU8,
}

impl<'a> FailureOrchestrator<'a> {
    pub fn new(
        config: DebugConfig,
        tunables: &'a Tunables,
        log: &'a SchedLog,
        region: &'a dyn RegionMemory,
        platform: Platform<'a>,
    ) -> Self {
        Self {
            config,
            tunables,
            log,
            region: PersistentRegion::new(region, platform.cache, config.log_tail),
            platform,
            snapshots: SnapshotStore::new(),
            causes: UploadCauses::new(),
            state: AtomicU8::new(FailureState::Armed as u8),
            owner: AtomicU8::new(NO_OWNER),
        }
    }

    pub fn state(&self) -> FailureState {
        FailureState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn causes(&self) -> &UploadCauses {
        &self.causes
    }

    pub fn region(&self) -> &PersistentRegion<'a> {
        &self.region
    }

    pub fn platform(&self) -> &Platform<'a> {
        &self.platform
    }

    fn enabled(&self) -> bool {
        self.tunables.kernel_fault_enabled()
    }

    fn advance(&self, to: FailureState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    fn set_upload_cause(&self, cpu: CpuId, cause: UploadCause) {
        self.causes.set(cpu, cause, self.platform.board);
    }

    /// Boot-time arming: magic set, cause `Init`.
    pub fn arm(&self, cpu: CpuId) -> NotifyVerdict {
        if !self.enabled() {
            return NotifyVerdict::NotHandled;
        }
        self.region.set_magic(PANIC_MAGIC, None);
        self.set_upload_cause(cpu, UploadCause::Init);
        NotifyVerdict::Done
    }

    /// Panic notifier entry. Does not return unless the recorder is disabled.
    pub fn on_panic(&self, cpu: CpuId, reason: &str) -> NotifyVerdict {
        if !self.enabled() {
            return NotifyVerdict::NotHandled;
        }
        self.fail(cpu, reason, Entry::Notified)
    }

    /// Entry for faults where the current-task state is not trusted.
    ///
    /// Skips the bus floor, PLL log, watchdog and extended dump, and always
    /// records [`UploadCause::KernelPanic`].
    pub fn on_panic_safe(&self, cpu: CpuId, reason: &str) -> NotifyVerdict {
        if !self.enabled() {
            return NotifyVerdict::NotHandled;
        }
        self.fail(cpu, reason, Entry::Safe)
    }

    /// Orderly reboot: clear the magic.
    pub fn on_reboot(&self) -> NotifyVerdict {
        self.region.set_magic(CLEAN_MAGIC, None);
        NotifyVerdict::Done
    }

    /// Hook for the kernel's stack dumps: snapshot and flush.
    pub fn on_dump_stack(&self, cpu: CpuId) -> NotifyVerdict {
        if !self.enabled() {
            return NotifyVerdict::NotHandled;
        }
        self.snapshots.capture(cpu, self.platform.cpu);
        self.platform.cache.flush_inner();
        NotifyVerdict::Done
    }

    /// Snapshot `cpu` with local IRQs masked for the duration.
    pub fn save_context(&self, cpu: CpuId) {
        let flags = self.platform.cpu.local_irq_save();
        self.snapshots.capture(cpu, self.platform.cpu);
        self.platform.cpu.local_irq_restore(flags);
        log::error!("context saved ({})", cpu);
    }

    fn fail(&self, cpu: CpuId, reason: &str, entry: Entry) -> ! {
        let Platform {
            cpu: cpu_ops,
            board,
            ..
        } = self.platform;

        if let Err(owner) = self.owner.compare_exchange(
            NO_OWNER,
            cpu.index() as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            cpu_ops.local_irq_disable();
            if owner as usize == cpu.index() {
                log::error!("{}: nested failure \"{}\", resetting", cpu, reason);
                self.advance(FailureState::ResetPending);
                self.reset(cpu);
            }
            self.snapshots.capture(cpu, cpu_ops);
            self.platform.cache.flush_inner();
            self.park(cpu);
        }

        self.advance(FailureState::Diagnosing);
        if entry == Entry::Notified {
            board.request_bus_floor(self.config.bus_floor);
        }
        cpu_ops.local_irq_disable();

        self.log.halt();
        if entry == Entry::Notified {
            board.for_each_pll(&mut |name, value| log::info!("{} :{:x}", name, value));
        }

        self.region.set_magic(PANIC_MAGIC, Some(reason.as_bytes()));

        let cause = match entry {
            Entry::Notified => UploadCause::classify(reason),
            Entry::Safe => UploadCause::KernelPanic,
        };
        self.set_upload_cause(cpu, cause);

        log::error!("checksum_sched_log: {:x}", self.log.checksum());

        if entry == Entry::Notified && self.config.disable_watchdog {
            board.disable_watchdog();
            log::error!("disable watchdog reset while printing log");
        }

        self.advance(FailureState::Frozen);
        if entry == Entry::Notified {
            dump::extended_dump(self.config.dump_mode, cpu, self.platform.kernel);
        }

        self.advance(FailureState::ResetPending);
        self.snapshots.capture(cpu, cpu_ops);
        self.platform.cache.flush_inner();
        self.reset(cpu)
    }

    /// Flush everything and reset the board.
    pub fn reset(&self, cpu: CpuId) -> ! {
        let banner = self.platform.kernel.banner();
        if !banner.is_empty() {
            log::error!("{}", banner);
        }
        log::error!("rebooting...");

        self.platform.cache.flush_all();
        self.platform.board.restart();

        loop {
            log::error!("{}: reset did not take effect, should not happen", cpu);
            self.platform.cpu.relax();
        }
    }

    fn park(&self, cpu: CpuId) -> ! {
        log::error!("{}: parked while another CPU resets the board", cpu);
        loop {
            self.platform.cpu.relax();
        }
    }
}

impl PanicNotifier for FailureOrchestrator<'_> {
    fn on_panic(&self, cpu: CpuId, reason: &str) -> NotifyVerdict {
        FailureOrchestrator::on_panic(self, cpu, reason)
    }
}

impl RebootNotifier for FailureOrchestrator<'_> {
    fn on_reboot(&self) -> NotifyVerdict {
        FailureOrchestrator::on_reboot(self)
    }
}

impl KmsgDumper for FailureOrchestrator<'_> {
    fn dump(&self, _reason: DumpReason, older: &[u8], newer: &[u8]) {
        self.region.append_kernel_log_tail(older, newer);
    }
}
