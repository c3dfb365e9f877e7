//! In-memory board for driving the recorder on a host.
//!
//! Every collaborator trait the recorder needs is implemented here against
//! plain memory. Irreversible steps (IRQ masking, cache flushes, scratch
//! register writes, the reset itself) are appended to a shared [`Journal`]
//! so tests can check their order.
//!
//! The failure path never returns on hardware. Here [`SimBoard::restart`]
//! unwinds with a [`ResetIssued`] payload instead, and the panic path of
//! [`SimKernel`] unwinds with [`KernelHalted`] if no notifier took over.
//! A CPU spinning in a park loop unwinds with [`CpuParked`] on its first
//! [`CpuOps::relax`]. [`expect_reset`] and [`expect_parked`] catch those.

use std::alloc::{self, Layout};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use spin::Mutex;

use kernel::arch::{BoardOps, BusFloor, CacheOps, ClockOps, CpuOps, InformReg, IrqFlags};
use kernel::config::{ConfigError, DebugConfig};
use kernel::crashkey::{OneShotTimer, DEFAULT_KEY_TABLE};
use kernel::dump::{
    CpuTimes, KernelIntrospection, TaskError, TaskInfo, NR_SOFTIRQS, TASK_RUNNING,
    TASK_UNINTERRUPTIBLE,
};
use kernel::kmsg::KmsgRing;
use kernel::notifier::{
    DumpReason, KmsgDumper, NotifierRegistry, NotifyVerdict, PanicNotifier, PanicTrigger,
    RebootNotifier,
};
use kernel::percpu::{CpuId, MAX_CPUS};
use kernel::recorder::{Recorder, RecorderParts};
use kernel::region::{RegionImage, RegionMemory, REGION_SIZE};
use kernel::snapshot::{CoreRegs, MmuRegs};
use kernel::{Platform, SchedLog, Tunables};

/// Kernel version banner printed before the reset.
pub const BANNER: &str = "Linux version 3.4.5-lastgasp (sim@host) #1 SMP PREEMPT";

/// One observable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BusFloor(BusFloor),
    IrqOff,
    IrqSave,
    IrqRestore,
    SaveCoreRegs,
    SaveMmuRegs,
    FlushInner,
    FlushOuter,
    Inform(InformReg, u32),
    WatchdogOff,
    ShowState { backtraces: bool },
    TimerStart(Duration),
    TimerCancel,
    Restart,
}

/// Unwind payload of [`SimBoard::restart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetIssued;

/// Unwind payload of [`SimBoard::relax`]: the CPU would spin here forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuParked;

/// Unwind payload of a panic nobody handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelHalted(pub String);

#[derive(Default)]
pub struct Journal {
    actions: Mutex<Vec<Action>>,
}

impl Journal {
    pub fn push(&self, action: Action) {
        self.actions.lock().push(action);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    pub fn clear(&self) {
        self.actions.lock().clear();
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// A zeroed, leaked [`SchedLog`]. All-zero is the empty log, and building the
/// log in place keeps its rings off the stack.
pub fn leak_sched_log() -> &'static SchedLog {
    let layout = Layout::new::<SchedLog>();
    // SAFETY: every field of `SchedLog` is an atomic integer, an atomic bool
    // or a marker type, all of which are valid when zeroed.
    unsafe {
        let ptr = alloc::alloc_zeroed(layout).cast::<SchedLog>();
        if ptr.is_null() {
            alloc::handle_alloc_error(layout);
        }
        &*ptr
    }
}

// =============================================================================
// Board
// =============================================================================

/// CPU, cache, clock and board services.
pub struct SimBoard {
    journal: &'static Journal,
    /// Nanoseconds; every read advances it by one microsecond.
    now: AtomicU64,
    inform: Mutex<[u32; 3]>,
}

impl SimBoard {
    pub fn new(journal: &'static Journal) -> Self {
        Self {
            journal,
            now: AtomicU64::new(0),
            inform: Mutex::new([0; 3]),
        }
    }

    pub fn inform(&self, reg: InformReg) -> u32 {
        self.inform.lock()[Self::inform_index(reg)]
    }

    fn inform_index(reg: InformReg) -> usize {
        match reg {
            InformReg::Inform3 => 0,
            InformReg::Inform4 => 1,
            InformReg::Inform6 => 2,
        }
    }
}

impl CpuOps for SimBoard {
    fn local_irq_disable(&self) {
        self.journal.push(Action::IrqOff);
    }

    fn local_irq_save(&self) -> IrqFlags {
        self.journal.push(Action::IrqSave);
        IrqFlags(0x13)
    }

    fn local_irq_restore(&self, _flags: IrqFlags) {
        self.journal.push(Action::IrqRestore);
    }

    fn save_core_regs(&self, regs: &mut CoreRegs) {
        self.journal.push(Action::SaveCoreRegs);
        *regs = CoreRegs {
            pc: 0xc000_8000,
            cpsr: 0x6000_0093,
            r13_svc: 0xd000_1f00,
            ..CoreRegs::ZERO
        };
    }

    fn save_mmu_regs(&self, regs: &mut MmuRegs) {
        self.journal.push(Action::SaveMmuRegs);
        *regs = MmuRegs {
            sctlr: 0x10c5_387d,
            ttbr0: 0x4000_406a,
            ..MmuRegs::ZERO
        };
    }

    fn relax(&self) {
        panic::panic_any(CpuParked);
    }
}

impl CacheOps for SimBoard {
    fn flush_inner(&self) {
        self.journal.push(Action::FlushInner);
    }

    fn flush_outer(&self) {
        self.journal.push(Action::FlushOuter);
    }
}

impl ClockOps for SimBoard {
    fn cpu_clock(&self, _cpu: CpuId) -> u64 {
        self.now.fetch_add(1_000, Ordering::Relaxed)
    }
}

impl BoardOps for SimBoard {
    fn request_bus_floor(&self, floor: BusFloor) {
        self.journal.push(Action::BusFloor(floor));
    }

    fn disable_watchdog(&self) {
        self.journal.push(Action::WatchdogOff);
    }

    fn write_inform(&self, reg: InformReg, value: u32) {
        self.inform.lock()[Self::inform_index(reg)] = value;
        self.journal.push(Action::Inform(reg, value));
    }

    fn for_each_pll(&self, visit: &mut dyn FnMut(&'static str, u32)) {
        visit("APLL_CON0", 0xa0af_0300);
        visit("BPLL_CON0", 0x8085_0300);
        visit("KPLL_CON0", 0x80c8_0300);
    }

    fn restart(&self) {
        self.journal.push(Action::Restart);
        panic::panic_any(ResetIssued);
    }
}

// =============================================================================
// Persistent window
// =============================================================================

pub struct RamRegion {
    bytes: Mutex<Vec<u8>>,
}

impl RamRegion {
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(vec![0; REGION_SIZE]),
        }
    }

    /// Copy of the window as the next boot stage would see it.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Overwrite raw bytes, e.g. to model a torn write.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        self.write(offset, bytes);
    }
}

impl Default for RamRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionMemory for RamRegion {
    fn write(&self, offset: usize, bytes: &[u8]) {
        let mut ram = self.bytes.lock();
        let end = (offset + bytes.len()).min(REGION_SIZE);
        if offset < end {
            ram[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let ram = self.bytes.lock();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = ram.get(offset + i).copied().unwrap_or(0);
        }
    }

    fn base_addr(&self) -> usize {
        self.bytes.lock().as_ptr() as usize
    }
}

// =============================================================================
// Kernel
// =============================================================================

#[derive(Debug, Clone)]
pub struct SimTask {
    pub pid: i32,
    pub comm: String,
    pub state: u32,
    pub cpu: u32,
    pub kernel_thread: bool,
    /// `for_each_task` reports this task as inaccessible.
    pub broken: bool,
    pub threads: Vec<SimTask>,
}

impl SimTask {
    pub fn new(pid: i32, comm: &str, state: u32, cpu: u32) -> Self {
        Self {
            pid,
            comm: comm.to_string(),
            state,
            cpu,
            kernel_thread: false,
            broken: false,
            threads: Vec::new(),
        }
    }

    fn info(&self) -> Result<TaskInfo<'_>, TaskError> {
        if self.broken {
            return Err(TaskError { pid: self.pid });
        }
        Ok(TaskInfo {
            pid: self.pid,
            utime: u64::from(self.pid.unsigned_abs()) * 3,
            stime: u64::from(self.pid.unsigned_abs()) * 2,
            exec_start: 1_000_000,
            state: self.state,
            cpu: self.cpu,
            wchan: if self.state == TASK_RUNNING { 0 } else { 0xc006_1234 },
            wchan_symbol: (self.state != TASK_RUNNING).then_some("schedule_timeout"),
            user_pc: (!self.kernel_thread).then_some(0x4000_1000),
            task_addr: 0xd000_0000 + self.pid as usize * 0x400,
            comm: &self.comm,
            kernel_thread: self.kernel_thread,
        })
    }
}

/// A small default task list.
pub fn default_tasks() -> Vec<SimTask> {
    let mut init = SimTask::new(1, "init", 1, 0);
    init.threads.push(SimTask::new(120, "init:worker", TASK_UNINTERRUPTIBLE, 1));
    let mut kworker = SimTask::new(7, "kworker/0:1", TASK_RUNNING, 0);
    kworker.kernel_thread = true;
    vec![init, kworker, SimTask::new(300, "surfaceflinger", TASK_RUNNING, 1)]
}

/// Notifier chains, message buffer, task list and panic entry.
pub struct SimKernel {
    journal: &'static Journal,
    kmsg: &'static KmsgRing,
    tasks: Vec<SimTask>,
    panic_chain: Mutex<Vec<&'static dyn PanicNotifier>>,
    reboot_chain: Mutex<Vec<&'static dyn RebootNotifier>>,
    dumpers: Mutex<Vec<&'static dyn KmsgDumper>>,
    /// Runs once, inside the next `show_state`.
    during_dump: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SimKernel {
    pub fn new(journal: &'static Journal, kmsg: &'static KmsgRing, tasks: Vec<SimTask>) -> Self {
        Self {
            journal,
            kmsg,
            tasks,
            panic_chain: Mutex::new(Vec::new()),
            reboot_chain: Mutex::new(Vec::new()),
            dumpers: Mutex::new(Vec::new()),
            during_dump: Mutex::new(None),
        }
    }

    /// Run `f` in the middle of the next extended dump, e.g. to fail
    /// another CPU while the owner is frozen.
    pub fn during_dump(&self, f: impl FnOnce() + Send + 'static) {
        *self.during_dump.lock() = Some(Box::new(f));
    }

    pub fn kmsg(&self) -> &'static KmsgRing {
        self.kmsg
    }

    /// Append a line to the message buffer.
    pub fn printk(&self, line: &str) {
        self.kmsg.push_bytes(line.as_bytes());
        if !line.ends_with('\n') {
            self.kmsg.push_bytes(b"\n");
        }
    }

    pub fn registered(&self) -> (usize, usize, usize) {
        (
            self.panic_chain.lock().len(),
            self.reboot_chain.lock().len(),
            self.dumpers.lock().len(),
        )
    }

    fn kmsg_dump(&self, reason: DumpReason) {
        let dumpers = self.dumpers.lock().clone();
        for dumper in dumpers {
            self.kmsg
                .with_fragments(|older, newer| dumper.dump(reason, older, newer));
        }
    }

    /// Orderly reboot: message dump, then the reboot chain.
    pub fn reboot(&self) {
        self.kmsg_dump(DumpReason::Restart);
        let chain = self.reboot_chain.lock().clone();
        for notifier in chain {
            notifier.on_reboot();
        }
    }
}

impl NotifierRegistry for SimKernel {
    fn register_panic(&self, notifier: &'static dyn PanicNotifier) {
        self.panic_chain.lock().push(notifier);
    }

    fn register_reboot(&self, notifier: &'static dyn RebootNotifier) {
        self.reboot_chain.lock().push(notifier);
    }

    fn register_kmsg_dumper(&self, dumper: &'static dyn KmsgDumper) {
        self.dumpers.lock().push(dumper);
    }
}

impl PanicTrigger for SimKernel {
    fn panic(&self, cpu: CpuId, reason: &str) -> ! {
        self.printk(&format!("Kernel panic - not syncing: {}", reason));
        self.kmsg_dump(DumpReason::Panic);

        let chain = self.panic_chain.lock().clone();
        for notifier in chain {
            if notifier.on_panic(cpu, reason) == NotifyVerdict::NotHandled {
                log::info!("panic notifier abstained");
            }
        }
        panic::panic_any(KernelHalted(reason.to_string()))
    }
}

impl KernelIntrospection for SimKernel {
    fn current_task(&self, cpu: CpuId) -> Option<(i32, &str)> {
        self.tasks
            .iter()
            .flat_map(|task| std::iter::once(task).chain(task.threads.iter()))
            .find(|task| task.state == TASK_RUNNING && task.cpu as usize == cpu.index())
            .map(|task| (task.pid, task.comm.as_str()))
    }

    fn for_each_task(&self, visit: &mut dyn FnMut(Result<TaskInfo<'_>, TaskError>, bool)) {
        for task in &self.tasks {
            visit(task.info(), true);
            for thread in &task.threads {
                visit(thread.info(), false);
            }
        }
    }

    fn show_stack(&self, pid: i32) {
        log::info!("  [<c0061234>] (schedule+0x0/0x4c4) from pid {}", pid);
    }

    fn show_state(&self, backtraces: bool) {
        self.journal.push(Action::ShowState { backtraces });
        let hook = self.during_dump.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn cpu_online(&self, cpu: CpuId) -> bool {
        cpu.index() < 2
    }

    fn cpu_times(&self, cpu: CpuId) -> CpuTimes {
        let n = cpu.index() as u64 + 1;
        CpuTimes {
            user: 100 * n,
            nice: n,
            system: 50 * n,
            idle: 1000 * n,
            iowait: 3 * n,
            irq: 2 * n,
            softirq: 4 * n,
        }
    }

    fn for_each_irq(&self, visit: &mut dyn FnMut(u32, &[u32; MAX_CPUS], Option<&str>)) {
        let mut counts = [0u32; MAX_CPUS];
        counts[0] = 1200;
        counts[1] = 300;
        visit(27, &counts, Some("mct_tick0"));
        visit(90, &[5, 0, 0, 0], None);
        visit(91, &[0; MAX_CPUS], Some("unused"));
    }

    fn softirq_counts(&self, cpu: CpuId) -> [u32; NR_SOFTIRQS] {
        let mut counts = [0; NR_SOFTIRQS];
        counts[1] = 40 * (cpu.index() as u32 + 1);
        counts[9] = 7;
        counts
    }

    fn arch_irq_count(&self) -> u64 {
        12
    }

    fn banner(&self) -> &str {
        BANNER
    }
}

// =============================================================================
// Timer
// =============================================================================

/// Virtual one-shot timer for the hold policy.
pub struct SimTimer {
    journal: &'static Journal,
    /// (now, deadline) in nanoseconds.
    state: Mutex<(u64, Option<u64>)>,
}

impl SimTimer {
    pub fn new(journal: &'static Journal) -> Self {
        Self {
            journal,
            state: Mutex::new((0, None)),
        }
    }

    /// Move virtual time forward. Returns true if the timer fired.
    pub fn advance(&self, by: Duration) -> bool {
        let mut state = self.state.lock();
        state.0 += by.as_nanos() as u64;
        match state.1 {
            Some(deadline) if deadline <= state.0 => {
                state.1 = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().1.is_some()
    }
}

impl OneShotTimer for SimTimer {
    fn start(&self, delay: Duration) {
        self.journal.push(Action::TimerStart(delay));
        let mut state = self.state.lock();
        state.1 = Some(state.0 + delay.as_nanos() as u64);
    }

    fn cancel(&self) {
        self.journal.push(Action::TimerCancel);
        self.state.lock().1 = None;
    }
}

// =============================================================================
// Bench
// =============================================================================

/// A complete simulated device with one recorder on it.
///
/// Everything is leaked so the recorder can be `'static`, as it is in a
/// kernel. Each bench is independent of the global recorder cell.
pub struct Bench {
    pub journal: &'static Journal,
    pub board: &'static SimBoard,
    pub kernel: &'static SimKernel,
    pub region: &'static RamRegion,
    pub timer: &'static SimTimer,
    pub tunables: &'static Tunables,
    pub log: &'static SchedLog,
    pub recorder: &'static Recorder<'static>,
}

impl Bench {
    pub fn new(config: DebugConfig, level: u32) -> Result<Self, ConfigError> {
        Self::with_kmsg(config, level, leak(KmsgRing::new()))
    }

    /// Bench whose kernel dumps `kmsg` (e.g. the ring the global logger fills).
    pub fn with_kmsg(
        config: DebugConfig,
        level: u32,
        kmsg: &'static KmsgRing,
    ) -> Result<Self, ConfigError> {
        let journal: &'static Journal = leak(Journal::default());
        let board = leak(SimBoard::new(journal));
        let kernel = leak(SimKernel::new(journal, kmsg, default_tasks()));
        let region = leak(RamRegion::new());
        let timer = leak(SimTimer::new(journal));
        let tunables = leak(Tunables::with_level(level));
        let log = leak_sched_log();

        let parts = RecorderParts {
            tunables,
            log,
            region,
            platform: Platform {
                cpu: board,
                cache: board,
                clock: board,
                board,
                kernel,
            },
            trigger: kernel,
            timer,
            key_table: DEFAULT_KEY_TABLE,
        };
        let recorder = leak(Recorder::new(config, parts)?);

        Ok(Self {
            journal,
            board,
            kernel,
            region,
            timer,
            tunables,
            log,
            recorder,
        })
    }

    /// Boot: arm the recorder and hook the notifier chains.
    pub fn boot(&self) -> NotifyVerdict {
        self.recorder.init(CpuId::BOOT, self.kernel)
    }

    /// Enter the kernel panic path on `cpu`.
    pub fn panic(&self, cpu: CpuId, reason: &str) -> ! {
        self.kernel.panic(cpu, reason)
    }

    /// Advance virtual time, delivering the hold-timer expiry on `cpu`.
    pub fn advance(&self, cpu: CpuId, by: Duration) {
        if self.timer.advance(by) {
            self.recorder.hold_timer_expired(cpu);
        }
    }

    pub fn region_bytes(&self) -> Vec<u8> {
        self.region.snapshot()
    }

    /// Run `f`, which must end in the board reset.
    pub fn expect_reset(&self, f: impl FnOnce()) -> Result<(), String> {
        expect_reset(f)
    }
}

/// Run `f` and report how it ended: `Ok` if the board was reset.
pub fn expect_reset(f: impl FnOnce()) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => Err("returned without resetting".to_string()),
        Err(payload) => {
            if payload.downcast_ref::<ResetIssued>().is_some() {
                Ok(())
            } else if let Some(KernelHalted(reason)) = payload.downcast_ref::<KernelHalted>() {
                Err(format!("kernel halted without reset: {}", reason))
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Run `f` and report how it ended: `Ok` if the CPU was parked.
pub fn expect_parked(f: impl FnOnce()) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => Err("returned without parking".to_string()),
        Err(payload) => {
            if payload.downcast_ref::<CpuParked>().is_some() {
                Ok(())
            } else if payload.downcast_ref::<ResetIssued>().is_some() {
                Err("reset instead of parking".to_string())
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Silence the default panic message for the simulated unwinds.
pub fn quiet_sim_panics() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        if payload.is::<ResetIssued>()
            || payload.is::<KernelHalted>()
            || payload.is::<CpuParked>()
        {
            return;
        }
        previous(info);
    }));
}

/// Decode a region snapshot.
pub fn parse_region(bytes: &[u8]) -> Result<RegionImage<'_>, kernel::region::RegionError> {
    RegionImage::parse(bytes)
}
