//! Extended state dump run while the failure path is frozen.
//!
//! Everything here is best effort. A task the kernel cannot describe is
//! logged and skipped; nothing in this module can stop the path to reset.
//!
//! The data comes from the kernel through [`KernelIntrospection`]; this
//! module only walks it and prints.

use core::fmt;

use crate::config::DumpMode;
use crate::percpu::{CpuId, MAX_CPUS};

pub const NR_SOFTIRQS: usize = 10;

pub const SOFTIRQ_NAMES: [&str; NR_SOFTIRQS] = [
    "HI",
    "TIMER",
    "NET_TX",
    "NET_RX",
    "BLOCK",
    "BLOCK_IOPOLL",
    "TASKLET",
    "SCHED",
    "HRTIMER",
    "RCU",
];

pub const TASK_RUNNING: u32 = 0;
pub const TASK_UNINTERRUPTIBLE: u32 = 2;

const STATE_LETTERS: [char; 10] = ['R', 'S', 'D', 'T', 't', 'Z', 'X', 'x', 'K', 'W'];

/// One letter for a task state word: the letter of its highest set bit.
pub fn state_letter(state: u32) -> char {
    let idx = (u32::BITS - state.leading_zeros()) as usize;
    STATE_LETTERS.get(idx).copied().unwrap_or('?')
}

/// What the kernel reports about one task.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo<'a> {
    pub pid: i32,
    pub utime: u64,
    pub stime: u64,
    pub exec_start: u64,
    /// Reportable state bits, exit state included.
    pub state: u32,
    pub cpu: u32,
    pub wchan: usize,
    pub wchan_symbol: Option<&'a str>,
    /// User-mode PC, when the task has an address space we may read.
    pub user_pc: Option<usize>,
    pub task_addr: usize,
    pub comm: &'a str,
    /// No user address space.
    pub kernel_thread: bool,
}

/// A task the kernel could not describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskError {
    pub pid: i32,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} is not accessible", self.pid)
    }
}

/// Time accounting in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl core::ops::AddAssign for CpuTimes {
    fn add_assign(&mut self, rhs: Self) {
        self.user += rhs.user;
        self.nice += rhs.nice;
        self.system += rhs.system;
        self.idle += rhs.idle;
        self.iowait += rhs.iowait;
        self.irq += rhs.irq;
        self.softirq += rhs.softirq;
    }
}

impl fmt::Display for CpuTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // steal, guest and guest_nice are not accounted
        write!(
            f,
            "user:{}  nice:{}  system:{}  idle:{}  iowait:{}  irq:{}  softirq:{} 0 0 0",
            self.user, self.nice, self.system, self.idle, self.iowait, self.irq, self.softirq
        )
    }
}

/// Kernel state the dump reads.
pub trait KernelIntrospection: Sync {
    /// Pid and name of the task running on `cpu`.
    fn current_task(&self, cpu: CpuId) -> Option<(i32, &str)>;

    /// Visit every process and, after each, its threads. The flag marks the
    /// process (group leader) entries.
    fn for_each_task(&self, visit: &mut dyn FnMut(Result<TaskInfo<'_>, TaskError>, bool));

    fn show_stack(&self, pid: i32);

    /// The kernel's own task-state dump.
    fn show_state(&self, backtraces: bool);

    fn cpu_online(&self, cpu: CpuId) -> bool {
        let _ = cpu;
        true
    }

    fn cpu_times(&self, cpu: CpuId) -> CpuTimes;

    /// Visit every interrupt line with its per-CPU counts and action name.
    fn for_each_irq(&self, visit: &mut dyn FnMut(u32, &[u32; MAX_CPUS], Option<&str>));

    fn softirq_counts(&self, cpu: CpuId) -> [u32; NR_SOFTIRQS];

    /// Interrupts counted outside the per-line counters.
    fn arch_irq_count(&self) -> u64 {
        0
    }

    /// Kernel version banner.
    fn banner(&self) -> &str {
        ""
    }
}

/// Totals produced by a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub tasks: usize,
    pub skipped: usize,
    pub irqs: u64,
    pub softirqs: u64,
}

const RULE: &str =
    " -----------------------------------------------------------------------------------";

/// Run the dump selected by `mode`.
pub fn extended_dump(mode: DumpMode, cpu: CpuId, kernel: &dyn KernelIntrospection) -> DumpSummary {
    match mode {
        DumpMode::FullTaskDump => {
            let mut summary = dump_all_tasks(cpu, kernel);
            let (irqs, softirqs) = dump_cpu_stat(kernel);
            summary.irqs = irqs;
            summary.softirqs = softirqs;
            kernel.show_state(false);
            summary
        }
        DumpMode::BuiltinTaskState => {
            kernel.show_state(true);
            DumpSummary::default()
        }
        DumpMode::Skip => DumpSummary::default(),
    }
}

fn dump_one_task(task: &TaskInfo<'_>, is_main: bool, kernel: &dyn KernelIntrospection) {
    let mut sym_buf = [0u8; 32];
    let mut sym = crate::fmtbuf::BufferWriter::new(&mut sym_buf);
    let sym_text = match task.wchan_symbol {
        Some(name) => name,
        None => {
            let _ = fmt::Write::write_fmt(&mut sym, format_args!("{}", task.wchan));
            core::str::from_utf8(sym.written()).unwrap_or("_____")
        }
    };

    log::info!(
        "{:8} {:8} {:8} {:16} {}({}) {:3}  {:08x} {:08x}  {:08x} {} {:>16} [{}]",
        task.pid,
        task.utime,
        task.stime,
        task.exec_start,
        state_letter(task.state),
        task.state,
        task.cpu,
        task.wchan,
        task.user_pc.unwrap_or(0),
        task.task_addr,
        if is_main { '*' } else { ' ' },
        task.comm,
        sym_text
    );

    if task.state == TASK_RUNNING || task.state == TASK_UNINTERRUPTIBLE || task.kernel_thread {
        kernel.show_stack(task.pid);
    }
}

/// Print the task table.
pub fn dump_all_tasks(cpu: CpuId, kernel: &dyn KernelIntrospection) -> DumpSummary {
    let mut summary = DumpSummary::default();

    match kernel.current_task(cpu) {
        Some((pid, comm)) => log::info!(" current proc : {} {}", pid, comm),
        None => log::info!(" current proc : unknown"),
    }
    log::info!("{}", RULE);
    log::info!(
        "     pid      uTime    sTime      exec(ns)  stat  cpu   wchan   user_pc  task_struct          comm   sym_wchan"
    );
    log::info!("{}", RULE);

    kernel.for_each_task(&mut |entry, is_main| match entry {
        Ok(task) => {
            dump_one_task(&task, is_main, kernel);
            summary.tasks += 1;
        }
        Err(err) => {
            log::warn!("dump: {}, skipped", err);
            summary.skipped += 1;
        }
    });

    log::info!("{}", RULE);
    summary
}

/// Print time accounting and interrupt counters. Returns (irqs, softirqs).
pub fn dump_cpu_stat(kernel: &dyn KernelIntrospection) -> (u64, u64) {
    let mut total = CpuTimes::default();
    let mut per_softirq = [0u64; NR_SOFTIRQS];
    let mut irq_sum = kernel.arch_irq_count();

    for cpu in CpuId::all() {
        total += kernel.cpu_times(cpu);
        for (sum, count) in per_softirq.iter_mut().zip(kernel.softirq_counts(cpu)) {
            *sum += count as u64;
        }
    }
    kernel.for_each_irq(&mut |_, counts, _| {
        irq_sum += counts.iter().map(|&c| c as u64).sum::<u64>();
    });
    let softirq_sum: u64 = per_softirq.iter().sum();

    log::info!(" cpu     {}", total);
    log::info!("{}", RULE);
    for cpu in CpuId::all().filter(|&cpu| kernel.cpu_online(cpu)) {
        log::info!(" cpu {}   {}", cpu.index(), kernel.cpu_times(cpu));
    }
    log::info!("{}", RULE);

    log::info!(" irq : {}", irq_sum);
    log::info!("{}", RULE);
    kernel.for_each_irq(&mut |irq, counts, name| {
        let per_irq: u64 = counts.iter().map(|&c| c as u64).sum();
        if per_irq != 0 {
            log::info!(" irq-{:4} : {:8} {}", irq, per_irq, name.unwrap_or("???"));
        }
    });
    log::info!("{}", RULE);

    log::info!(" softirq : {}", softirq_sum);
    log::info!("{}", RULE);
    for (i, (&count, name)) in per_softirq.iter().zip(SOFTIRQ_NAMES).enumerate() {
        if count != 0 {
            log::info!(" softirq-{} : {:8} {}", i, count, name);
        }
    }
    log::info!("{}", RULE);

    (irq_sum, softirq_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeKernel {
        stacks: Mutex<Vec<i32>>,
        states: Mutex<Vec<bool>>,
    }

    impl FakeKernel {
        fn new() -> Self {
            Self {
                stacks: Mutex::new(Vec::new()),
                states: Mutex::new(Vec::new()),
            }
        }
    }

    fn task(pid: i32, state: u32, kernel_thread: bool) -> TaskInfo<'static> {
        TaskInfo {
            pid,
            utime: 1,
            stime: 2,
            exec_start: 3,
            state,
            cpu: 0,
            wchan: 0,
            wchan_symbol: None,
            user_pc: None,
            task_addr: 0xc100_0000,
            comm: "task",
            kernel_thread,
        }
    }

    impl KernelIntrospection for FakeKernel {
        fn current_task(&self, _cpu: CpuId) -> Option<(i32, &str)> {
            Some((1, "init"))
        }
        fn for_each_task(&self, visit: &mut dyn FnMut(Result<TaskInfo<'_>, TaskError>, bool)) {
            visit(Ok(task(1, 1, false)), true);
            visit(Err(TaskError { pid: 7 }), false);
            visit(Ok(task(2, TASK_UNINTERRUPTIBLE, false)), true);
            visit(Ok(task(3, 1, true)), true);
        }
        fn show_stack(&self, pid: i32) {
            self.stacks.lock().unwrap().push(pid);
        }
        fn show_state(&self, backtraces: bool) {
            self.states.lock().unwrap().push(backtraces);
        }
        fn cpu_times(&self, _cpu: CpuId) -> CpuTimes {
            CpuTimes {
                user: 10,
                ..CpuTimes::default()
            }
        }
        fn for_each_irq(&self, visit: &mut dyn FnMut(u32, &[u32; MAX_CPUS], Option<&str>)) {
            visit(33, &[1, 2, 3, 4], Some("mct_tick"));
            visit(40, &[0; MAX_CPUS], None);
        }
        fn softirq_counts(&self, _cpu: CpuId) -> [u32; NR_SOFTIRQS] {
            let mut counts = [0; NR_SOFTIRQS];
            counts[1] = 5;
            counts
        }
    }

    #[test]
    fn state_letters_follow_highest_bit() {
        assert_eq!(state_letter(0), 'R');
        assert_eq!(state_letter(1), 'S');
        assert_eq!(state_letter(2), 'D');
        assert_eq!(state_letter(4), 'T');
        assert_eq!(state_letter(16), 'Z');
        assert_eq!(state_letter(256), 'W');
        assert_eq!(state_letter(0x1000), '?');
    }

    #[test]
    fn inaccessible_tasks_are_skipped() {
        let kernel = FakeKernel::new();
        let summary = extended_dump(DumpMode::FullTaskDump, CpuId::BOOT, &kernel);
        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.irqs, 10);
        assert_eq!(summary.softirqs, 5 * MAX_CPUS as u64);
        assert_eq!(*kernel.stacks.lock().unwrap(), vec![2, 3]);
        assert_eq!(*kernel.states.lock().unwrap(), vec![false]);
    }

    #[test]
    fn builtin_mode_only_shows_state() {
        let kernel = FakeKernel::new();
        let summary = extended_dump(DumpMode::BuiltinTaskState, CpuId::BOOT, &kernel);
        assert_eq!(summary, DumpSummary::default());
        assert_eq!(*kernel.states.lock().unwrap(), vec![true]);
        assert!(kernel.stacks.lock().unwrap().is_empty());
    }
}
