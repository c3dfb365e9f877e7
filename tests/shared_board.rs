//! Shared simulated-board helpers for the integration tests.
//!
//! Every test builds its own [`Bench`], so tests never share a recorder and
//! can run in parallel. Only the panic hook is process-wide.

#![allow(dead_code)]

use std::sync::Once;

use kernel::arch::InformReg;
use kernel::config::DebugConfig;
use kernel::crashkey::EV_KEY;
use kernel::region::RegionImage;
use kernel::tunables::LEVEL_ALL;
use kernel::{CpuId, UploadCause};
use lastgasp::sim::{self, Bench};

static QUIET: Once = Once::new();

/// Bench with the default configuration, both fault kinds enabled, booted.
pub fn booted() -> Bench {
    booted_with(DebugConfig::new(), LEVEL_ALL)
}

pub fn booted_with(config: DebugConfig, level: u32) -> Bench {
    QUIET.call_once(sim::quiet_sim_panics);
    let bench = Bench::new(config, level).expect("valid config");
    bench.boot();
    bench.journal.clear();
    bench
}

/// A little traffic on CPU0 and CPU1.
pub fn run_workload(bench: &Bench) {
    for cpu in CpuId::all().take(2) {
        for i in 0..16u32 {
            bench.recorder.task_switch(cpu, "worker", 200 + i as i32);
            bench.recorder.irq(cpu, 27, 0xc002_0000, 1);
            bench.recorder.irq_exit(cpu);
            bench.recorder.work(cpu, 0xd100_0000, 0xd200_0000, 0xc004_0000 + i as usize, 1);
            bench.recorder.timer(cpu, 1, 0xc005_0000);
        }
    }
    bench.kernel.printk("<6>[    1.000000] workload: done");
}

/// Run `f`, assert that it ended in a board reset.
pub fn assert_resets(bench: &Bench, f: impl FnOnce()) {
    if let Err(e) = bench.expect_reset(f) {
        panic!("expected a board reset: {}", e);
    }
}

/// The upload cause the boot loader would read.
pub fn upload_cause(bench: &Bench) -> Option<UploadCause> {
    UploadCause::from_raw(bench.board.inform(InformReg::Inform3))
}

/// Decode the persistent window and hand it to `f`.
pub fn with_region<R>(bench: &Bench, f: impl FnOnce(RegionImage<'_>) -> R) -> R {
    let bytes = bench.region_bytes();
    let image = RegionImage::parse(&bytes).expect("full window");
    f(image)
}

pub fn key(bench: &Bench, code: u16, pressed: bool) {
    bench
        .recorder
        .input_event(CpuId::BOOT, EV_KEY, code, i32::from(pressed));
}

pub fn tap(bench: &Bench, code: u16) {
    key(bench, code, true);
    key(bench, code, false);
}
