//! The recorder singleton.
//!
//! [`Recorder`] ties the pieces together: it owns the configuration, the
//! failure orchestrator, the crash-key input handler and the semaphore
//! trackers, and borrows the trace rings and tunables, which live in
//! statics of their own.
//!
//! Bring-up:
//!
//! ```text
//! Recorder::new(config, parts)   validate config, apply stream switches
//! install(recorder)              park it in the global cell
//! recorder.init(cpu, registry)   arm the region, hook the notifier chains
//! ```
//!
//! After `init` the kernel calls the free functions at the bottom of this
//! module from its scheduler, interrupt, workqueue and input paths.

use core::fmt;

use conquer_once::spin::OnceCell;

use crate::config::{ConfigError, DebugConfig};
use crate::crashkey::{CrashKeyInput, KeyState, KeyVerdict, OneShotTimer, CRASH_KEY_REASON};
use crate::notifier::{
    DumpReason, KmsgDumper, NotifierRegistry, NotifyVerdict, PanicNotifier, PanicTrigger,
    RebootNotifier,
};
use crate::orchestrator::{FailureOrchestrator, Platform};
use crate::percpu::CpuId;
use crate::region::RegionMemory;
use crate::ringlog::{AuxKind, Event, SchedLog};
use crate::semlog::{Direction, WaitTracker};
use crate::subsys::{LayoutDescriptor, LayoutError};
use crate::tunables::Tunables;

/// Literal accepted by the user-fault surface.
pub const USER_FAULT_COMMAND: &[u8] = b"dump_user_fault";

/// Longest accepted user-fault write.
pub const USER_FAULT_MAX_WRITE: usize = 99;

pub const USER_FAULT_REASON: &str = "User Fault";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFaultError {
    /// Write longer than [`USER_FAULT_MAX_WRITE`].
    InvalidInput { len: usize },
    /// The surface is compiled out of this configuration.
    Unsupported,
}

impl fmt::Display for UserFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserFaultError::InvalidInput { len } => write!(
                f,
                "user fault write of {} bytes exceeds {}",
                len, USER_FAULT_MAX_WRITE
            ),
            UserFaultError::Unsupported => write!(f, "user fault surface not enabled"),
        }
    }
}

/// Collaborators handed to [`Recorder::new`].
#[derive(Clone, Copy)]
pub struct RecorderParts<'a> {
    pub tunables: &'a Tunables,
    pub log: &'a SchedLog,
    pub region: &'a dyn RegionMemory,
    pub platform: Platform<'a>,
    /// Enters the kernel's panic path.
    pub trigger: &'a dyn PanicTrigger,
    /// Drives the hold policy's delay.
    pub timer: &'a dyn OneShotTimer,
    /// Entries for the key-table crash-key policy.
    pub key_table: &'static [KeyState],
}

pub struct Recorder<'a> {
    config: DebugConfig,
    tunables: &'a Tunables,
    log: &'a SchedLog,
    orchestrator: FailureOrchestrator<'a>,
    keys: CrashKeyInput,
    waits: WaitTracker,
    trigger: &'a dyn PanicTrigger,
    timer: &'a dyn OneShotTimer,
}

impl<'a> Recorder<'a> {
    pub fn new(config: DebugConfig, parts: RecorderParts<'a>) -> Result<Self, ConfigError> {
        config.validate()?;
        parts.log.configure(&config);

        Ok(Self {
            config,
            tunables: parts.tunables,
            log: parts.log,
            orchestrator: FailureOrchestrator::new(
                config,
                parts.tunables,
                parts.log,
                parts.region,
                parts.platform,
            ),
            keys: CrashKeyInput::from_config(&config, parts.key_table),
            waits: WaitTracker::new(),
            trigger: parts.trigger,
            timer: parts.timer,
        })
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn tunables(&self) -> &Tunables {
        self.tunables
    }

    pub fn log(&self) -> &SchedLog {
        self.log
    }

    pub fn orchestrator(&self) -> &FailureOrchestrator<'a> {
        &self.orchestrator
    }

    pub fn crash_keys(&self) -> &CrashKeyInput {
        &self.keys
    }

    pub fn wait_tracker(&self) -> &WaitTracker {
        &self.waits
    }

    // =========================================================================
    // Trace hooks
    // =========================================================================

    fn record(&self, cpu: CpuId, event: Event<'_>) {
        self.log.record(cpu, self.orchestrator.platform().clock, event);
    }

    #[inline]
    pub fn task_switch(&self, cpu: CpuId, comm: &str, pid: i32) {
        self.record(cpu, Event::TaskSwitch { comm, pid });
    }

    pub fn marker(&self, cpu: CpuId, text: &str) {
        self.record(cpu, Event::Marker(text));
    }

    #[inline]
    pub fn irq(&self, cpu: CpuId, irq: u32, handler: usize, flag: i32) {
        self.record(cpu, Event::Irq { irq, handler, flag });
    }

    #[inline]
    pub fn irq_exit(&self, cpu: CpuId) {
        self.log.irq_exit(cpu, self.orchestrator.platform().clock);
    }

    #[inline]
    pub fn work(&self, cpu: CpuId, worker: usize, work: usize, func: usize, flag: i32) {
        self.record(
            cpu,
            Event::Work {
                worker,
                work,
                func,
                flag,
            },
        );
    }

    #[inline]
    pub fn timer(&self, cpu: CpuId, kind: u32, func: usize) {
        self.record(cpu, Event::Timer { kind, func });
    }

    pub fn aux(&self, cpu: CpuId, kind: AuxKind, args: fmt::Arguments<'_>) {
        self.log.aux(cpu, self.orchestrator.platform().clock, kind, args);
    }

    pub fn sem_down(&self, sem: usize, pid: i32, cpu: CpuId) {
        self.waits.sem_down(sem, pid, cpu);
    }

    pub fn sem_up(&self, sem: usize, pid: i32) {
        self.waits.sem_up(sem, pid);
    }

    pub fn rwsem_down(&self, sem: usize, pid: i32, cpu: CpuId, direction: Direction) {
        self.waits.rwsem_down(sem, pid, cpu, direction);
    }

    pub fn rwsem_up(&self, sem: usize, pid: i32) {
        self.waits.rwsem_up(sem, pid);
    }

    // =========================================================================
    // Failure entry points
    // =========================================================================

    pub fn panic_safe(&self, cpu: CpuId, reason: &str) -> NotifyVerdict {
        self.orchestrator.on_panic_safe(cpu, reason)
    }

    pub fn dump_stack(&self, cpu: CpuId) -> NotifyVerdict {
        self.orchestrator.on_dump_stack(cpu)
    }

    pub fn save_context(&self, cpu: CpuId) {
        self.orchestrator.save_context(cpu);
    }

    /// Raw event from a connected input device.
    pub fn input_event(&self, cpu: CpuId, ev_type: u16, code: u16, value: i32) {
        let verdict = self.keys.event(self.tunables, ev_type, code, value);
        self.act_on(cpu, verdict);
    }

    /// Expiry callback of the hold timer.
    pub fn hold_timer_expired(&self, cpu: CpuId) {
        let verdict = self.keys.on_timer_expired(self.tunables);
        self.act_on(cpu, verdict);
    }

    fn act_on(&self, cpu: CpuId, verdict: KeyVerdict) {
        match verdict {
            KeyVerdict::Idle => {}
            KeyVerdict::ArmTimer(delay) => self.timer.start(delay),
            KeyVerdict::CancelTimer => self.timer.cancel(),
            KeyVerdict::Trigger => self.trigger.panic(cpu, CRASH_KEY_REASON),
        }
    }

    /// Write to the user-fault surface. Returns the bytes consumed.
    pub fn user_fault_write(&self, cpu: CpuId, input: &[u8]) -> Result<usize, UserFaultError> {
        if !self.config.user_fault {
            return Err(UserFaultError::Unsupported);
        }
        if input.len() > USER_FAULT_MAX_WRITE {
            return Err(UserFaultError::InvalidInput { len: input.len() });
        }
        if input.starts_with(USER_FAULT_COMMAND)
            && self.tunables.kernel_fault_enabled()
            && self.tunables.user_fault_enabled()
        {
            self.trigger.panic(cpu, USER_FAULT_REASON);
        }
        Ok(input.len())
    }

    /// Reset-reason token reported by the previous boot stage.
    pub fn reset_reason(&self) -> &'static str {
        self.tunables.reset_reason().token()
    }
}

impl Recorder<'static> {
    /// Arm the region and hook into the kernel's notifier chains.
    ///
    /// Abstains without touching anything when kernel-fault handling is off.
    pub fn init(&'static self, cpu: CpuId, registry: &dyn NotifierRegistry) -> NotifyVerdict {
        if !self.tunables.kernel_fault_enabled() {
            log::info!("recorder disabled (level {:#x})", self.tunables.level());
            return NotifyVerdict::NotHandled;
        }

        if self.config.semaphore_log {
            self.waits.init();
        }
        self.orchestrator.arm(cpu);

        registry.register_panic(self);
        registry.register_reboot(self);
        registry.register_kmsg_dumper(self);

        log::info!(
            "recorder armed: level {:#x}, reset reason {}",
            self.tunables.level(),
            self.reset_reason()
        );
        NotifyVerdict::Done
    }

    /// Encode the ring layout table into `out`.
    pub fn describe_layout(&'static self, out: &mut [u8]) -> Result<usize, LayoutError> {
        let platform = self.orchestrator.platform();
        LayoutDescriptor::describe(self.log, self.orchestrator.region().base_addr(), platform.board)
            .encode(out)
    }
}

impl PanicNotifier for Recorder<'_> {
    fn on_panic(&self, cpu: CpuId, reason: &str) -> NotifyVerdict {
        self.orchestrator.on_panic(cpu, reason)
    }
}

impl RebootNotifier for Recorder<'_> {
    fn on_reboot(&self) -> NotifyVerdict {
        self.orchestrator.on_reboot()
    }
}

impl KmsgDumper for Recorder<'_> {
    fn dump(&self, reason: DumpReason, older: &[u8], newer: &[u8]) {
        KmsgDumper::dump(&self.orchestrator, reason, older, newer);
    }
}

// =============================================================================
// Global instance
// =============================================================================

static RECORDER: OnceCell<Recorder<'static>> = OnceCell::uninit();

/// Park `recorder` in the global cell. Only the first call wins; later ones
/// get `None`.
pub fn install(recorder: Recorder<'static>) -> Option<&'static Recorder<'static>> {
    RECORDER.try_init_once(|| recorder).ok()?;
    RECORDER.try_get().ok()
}

pub fn get() -> Option<&'static Recorder<'static>> {
    RECORDER.try_get().ok()
}

#[inline]
pub fn task_switch(cpu: CpuId, comm: &str, pid: i32) {
    if let Some(recorder) = get() {
        recorder.task_switch(cpu, comm, pid);
    }
}

#[inline]
pub fn irq(cpu: CpuId, irq: u32, handler: usize, flag: i32) {
    if let Some(recorder) = get() {
        recorder.irq(cpu, irq, handler, flag);
    }
}

#[inline]
pub fn irq_exit(cpu: CpuId) {
    if let Some(recorder) = get() {
        recorder.irq_exit(cpu);
    }
}

#[inline]
pub fn work(cpu: CpuId, worker: usize, work: usize, func: usize, flag: i32) {
    if let Some(recorder) = get() {
        recorder.work(cpu, worker, work, func, flag);
    }
}

#[inline]
pub fn timer(cpu: CpuId, kind: u32, func: usize) {
    if let Some(recorder) = get() {
        recorder.timer(cpu, kind, func);
    }
}

pub fn input_event(cpu: CpuId, ev_type: u16, code: u16, value: i32) {
    if let Some(recorder) = get() {
        recorder.input_event(cpu, ev_type, code, value);
    }
}
