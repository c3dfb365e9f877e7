//! Interfaces to the kernel's notification chains.
//!
//! The recorder does not own the panic path, the reboot path or the message
//! buffer. It implements these traits and registers itself with whatever
//! [`NotifierRegistry`] the kernel provides at init time.

use crate::percpu::CpuId;

/// Result of a notifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyVerdict {
    /// The callback ran.
    Done,
    /// The recorder is disabled and abstained.
    NotHandled,
}

/// Why the message buffer is being dumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpReason {
    Panic,
    Oops,
    Emergency,
    Restart,
    Halt,
    PowerOff,
}

/// Called by the kernel's panic path.
///
/// When the recorder handles the panic it does not return.
pub trait PanicNotifier: Sync {
    fn on_panic(&self, cpu: CpuId, reason: &str) -> NotifyVerdict;
}

/// Called on an orderly reboot or shutdown.
pub trait RebootNotifier: Sync {
    fn on_reboot(&self) -> NotifyVerdict;
}

/// Receives the message buffer as two fragments, older first.
pub trait KmsgDumper: Sync {
    fn dump(&self, reason: DumpReason, older: &[u8], newer: &[u8]);
}

/// The kernel side that holds the notifier chains.
pub trait NotifierRegistry {
    fn register_panic(&self, notifier: &'static dyn PanicNotifier);
    fn register_reboot(&self, notifier: &'static dyn RebootNotifier);
    fn register_kmsg_dumper(&self, dumper: &'static dyn KmsgDumper);
}

/// Enter the kernel's panic path with `reason`.
pub trait PanicTrigger: Sync {
    fn panic(&self, cpu: CpuId, reason: &str) -> !;
}
