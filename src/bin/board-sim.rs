//! Drive the crash recorder on the simulated board and print what the next
//! boot stage would find.
//!
//! ```text
//! board-sim panic --reason "Oops: null pointer"
//! board-sim crash-key --policy hold
//! board-sim user-fault
//! board-sim reboot
//! board-sim layout
//! ```

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use kernel::arch::InformReg;
use kernel::config::DebugConfig;
use kernel::crashkey::{EV_KEY, KEY_POWER, KEY_VOLUMEDOWN, KEY_VOLUMEUP};
use kernel::kmsg::KmsgRing;
use kernel::logger::{self, ConsoleSink, KmsgLogger};
use kernel::region::RegionState;
use kernel::subsys::{LayoutDescriptor, RingSlot, DESCRIPTOR_SIZE};
use kernel::tunables::LEVEL_ALL;
use kernel::{CpuId, CrashKeyPolicy, UploadCause};
use lastgasp::sim::{self, Bench};

static KMSG: KmsgRing = KmsgRing::new();

struct Stdout;

impl ConsoleSink for Stdout {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

static STDOUT: Stdout = Stdout;

#[derive(Parser)]
#[command(name = "board-sim", about = "Crash recorder on a simulated Exynos board")]
struct Args {
    /// Debug level (low half: kernel faults, high half: user faults).
    #[arg(long, default_value_t = LEVEL_ALL, value_parser = parse_level)]
    level: u32,

    /// Trace events generated per CPU before the failure.
    #[arg(long, default_value_t = 64)]
    events: u32,

    /// Echo every log line instead of warnings only.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Kernel panic with the given reason.
    Panic {
        #[arg(long, default_value = "Oops: kernel NULL pointer dereference")]
        reason: String,
    },
    /// Press the crash-key combination of a policy.
    CrashKey {
        #[arg(long, value_enum, default_value_t = Policy::Sequential)]
        policy: Policy,
    },
    /// Write the user-fault command.
    UserFault,
    /// Orderly reboot.
    Reboot,
    /// Print the ring layout descriptor.
    Layout,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Sequential,
    Hold,
    Table,
}

impl From<Policy> for CrashKeyPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Sequential => CrashKeyPolicy::Sequential,
            Policy::Hold => CrashKeyPolicy::SimultaneousHold,
            Policy::Table => CrashKeyPolicy::KeyTable,
        }
    }
}

fn parse_level(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid level {:?}: {}", s, e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    logger::init(KmsgLogger::new(&KMSG, level).with_console(&STDOUT))
        .map_err(|e| anyhow!("logger: {}", e))?;
    sim::quiet_sim_panics();

    let mut config = DebugConfig::new();
    if let Cmd::CrashKey { policy } = &args.cmd {
        config.crash_key = (*policy).into();
        config.hold_delay = Duration::from_secs(3);
    }

    let bench = Bench::with_kmsg(config, args.level, &KMSG).map_err(|e| anyhow!("config: {}", e))?;
    bench.boot();
    workload(&bench, args.events);

    match args.cmd {
        Cmd::Panic { reason } => {
            bench
                .expect_reset(|| bench.panic(CpuId::BOOT, &reason))
                .map_err(|e| anyhow!(e))?;
        }
        Cmd::CrashKey { policy } => {
            bench
                .expect_reset(|| press_crash_keys(&bench, policy))
                .map_err(|e| anyhow!(e))?;
        }
        Cmd::UserFault => {
            bench
                .expect_reset(|| {
                    if let Err(e) = bench.recorder.user_fault_write(CpuId::BOOT, b"dump_user_fault\n") {
                        log::error!("user fault rejected: {}", e);
                    }
                })
                .map_err(|e| anyhow!(e))?;
        }
        Cmd::Reboot => bench.kernel.reboot(),
        Cmd::Layout => return print_layout(&bench),
    }

    report(&bench)
}

/// Synthetic scheduler, interrupt, work and timer traffic on two CPUs.
fn workload(bench: &Bench, events: u32) {
    let comms = ["init", "kworker/0:1", "surfaceflinger", "system_server"];
    for cpu in CpuId::all().take(2) {
        for i in 0..events {
            let recorder = bench.recorder;
            let comm = comms[i as usize % comms.len()];
            recorder.task_switch(cpu, comm, 100 + i as i32);
            recorder.irq(cpu, 27 + i % 4, 0xc002_0000 + (i as usize) * 0x40, 1);
            recorder.irq(cpu, 27 + i % 4, 0xc002_0000 + (i as usize) * 0x40, 2);
            recorder.irq_exit(cpu);
            recorder.work(cpu, 0xd100_0000, 0xd200_0000 + i as usize, 0xc004_0000, 1);
            recorder.timer(cpu, 1, 0xc005_0000 + i as usize);
        }
    }
    bench.recorder.marker(CpuId::BOOT, "workload done");
    for i in 0..8 {
        bench.kernel.printk(&format!("<6>[{:5}.000000] sim: tick {}", i, i));
    }
}

fn key(bench: &Bench, code: u16, pressed: bool) {
    bench
        .recorder
        .input_event(CpuId::BOOT, EV_KEY, code, i32::from(pressed));
}

fn press_crash_keys(bench: &Bench, policy: Policy) {
    match policy {
        Policy::Sequential => {
            key(bench, KEY_VOLUMEDOWN, true);
            for _ in 0..2 {
                key(bench, KEY_POWER, true);
                key(bench, KEY_POWER, false);
            }
        }
        Policy::Hold => {
            key(bench, KEY_VOLUMEUP, true);
            key(bench, KEY_VOLUMEDOWN, true);
            bench.advance(CpuId::BOOT, Duration::from_secs(3));
        }
        Policy::Table => {
            key(bench, KEY_VOLUMEDOWN, true);
            for _ in 0..2 {
                key(bench, KEY_POWER, true);
                key(bench, KEY_POWER, false);
            }
        }
    }
    log::warn!("crash keys did not fire");
}

fn report(bench: &Bench) -> Result<()> {
    let bytes = bench.region_bytes();
    let image = sim::parse_region(&bytes).map_err(|e| anyhow!("region: {}", e))?;

    println!();
    println!("=== persistent region ===");
    match image.state().map_err(|e| anyhow!("region: {}", e))? {
        RegionState::Clean => println!("state:   clean (orderly reboot)"),
        RegionState::UploadPending => println!("state:   upload pending"),
        RegionState::Unknown(magic) => bail!("unexpected magic {:#x}", magic),
    }

    let raw = bench.board.inform(InformReg::Inform3);
    match UploadCause::from_raw(raw) {
        Some(cause) => println!("cause:   {}", cause),
        None => println!("cause:   unknown ({:#x})", raw),
    }
    println!("reason:  {}", String::from_utf8_lossy(image.reason()));
    println!("halted:  {}", bench.log.is_halted());
    println!("sum:     {:x}", bench.log.checksum());

    let cpu = CpuId::BOOT;
    if let Some(last) = bench.log.task(cpu).latest() {
        println!(
            "last task on {}: {} ({})",
            cpu,
            String::from_utf8_lossy(last.comm()),
            last.pid
        );
    }

    println!("--- log tail ---");
    print!("{}", String::from_utf8_lossy(image.log_tail()));
    println!("--- journal ---");
    for action in bench.journal.actions() {
        println!("{:?}", action);
    }
    Ok(())
}

fn print_layout(bench: &Bench) -> Result<()> {
    let mut out = [0u8; DESCRIPTOR_SIZE];
    let len = bench
        .recorder
        .describe_layout(&mut out)
        .map_err(|e| anyhow!("layout: {}", e))?;
    let desc = LayoutDescriptor::parse(&out[..len]).map_err(|e| anyhow!("layout: {}", e))?;

    println!("cpus:    {}", desc.nr_cpus);
    println!("region:  {:#x}", desc.region_base);
    for (name, slot) in [
        ("task", RingSlot::Task),
        ("irq", RingSlot::Irq),
        ("work", RingSlot::Work),
        ("timer", RingSlot::Timer),
        ("aux", RingSlot::Aux),
    ] {
        let ring = desc.ring(slot);
        println!(
            "{:<6} buf {:#x} cursor {:#x} {} x {} bytes, {} cpu(s) stride {:#x}",
            name,
            ring.buf_paddr,
            ring.cursor_paddr,
            ring.entries,
            ring.record_size,
            ring.cpus,
            ring.cpu_stride
        );
    }
    Ok(())
}
