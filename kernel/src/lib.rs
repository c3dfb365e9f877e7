//! Always-armed crash recorder for ARMv7 mobile SoCs.
//!
//! The recorder keeps low-overhead per-CPU traces of scheduling, interrupt,
//! work-queue and timer activity, and when the kernel dies it freezes those
//! traces, snapshots the faulting CPU, writes a magic/cause marker plus the
//! panic reason and kernel-log tail into a reserved window of RAM that
//! survives a warm reset, and then resets the board so the next boot stage
//! can pull the state out.
//!
//! # Architecture
//!
//! ```text
//! scheduler / irq / workqueue / timers           input devices
//!          |  record(cpu, event)                      |  key events
//!          v                                          v
//! +------------------+                     +--------------------+
//! |     ringlog      |<---- halt() --------|   crashkey         |
//! | per-CPU rings    |                     | combo detection    |
//! +------------------+                     +---------+----------+
//!          ^                                         | panic("Crash Key")
//!          | checksum                                v
//! +------------------+   capture(cpu)   +----------------------------+
//! |    snapshot      |<-----------------|       orchestrator         |
//! | core + MMU regs  |                  | Armed -> Diagnosing ->     |
//! +------------------+                  | Frozen -> ResetPending     |
//!                                       +-------------+--------------+
//!                                                     | set_magic / tail
//!                                                     v
//!                                       +----------------------------+
//!                                       |  region (persistent RAM)   |
//!                                       +----------------------------+
//! ```
//!
//! Everything that touches hardware goes through the traits in [`arch`];
//! everything that belongs to the surrounding kernel (notifier chains, the
//! message buffer owner, task lists) goes through [`notifier`] and
//! [`dump::KernelIntrospection`].

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod cause;
pub mod config;
pub mod crashkey;
pub mod dump;
pub mod fmtbuf;
pub mod kmsg;
pub mod logger;
pub mod notifier;
pub mod orchestrator;
pub mod percpu;
pub mod recorder;
pub mod region;
pub mod ringlog;
pub mod semlog;
pub mod snapshot;
pub mod subsys;
pub mod tunables;

pub use cause::UploadCause;
pub use config::{CrashKeyPolicy, DebugConfig, DumpMode};
pub use notifier::NotifyVerdict;
pub use orchestrator::{FailureOrchestrator, FailureState, Platform};
pub use percpu::{CpuId, MAX_CPUS};
pub use recorder::Recorder;
pub use region::{PersistentRegion, RegionImage, PANIC_MAGIC};
pub use ringlog::SchedLog;
pub use tunables::Tunables;
