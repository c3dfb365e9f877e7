//! Crash-key detection.
//!
//! A user-held button combination that forces the failure path with the
//! reason "Crash Key". Three recognizers are available, picked by
//! [`CrashKeyPolicy`]:
//!
//! - [`SequentialKeys`]: volume-down held, volume-up not held, power pressed
//!   twice.
//! - [`HoldKeys`]: both volume keys held for the configured delay.
//! - [`KeyTable`]: a table of required key states plus a trigger key.
//!
//! Recognizers only return a [`KeyVerdict`]; [`CrashKeyInput`] wraps one as
//! an input handler and the owner acts on the verdict (panic, start or
//! cancel the hold timer).

pub mod hold;
pub mod keys;
pub mod keytable;
pub mod sequential;

use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;

use spin::Mutex;

use crate::config::{CrashKeyPolicy, DebugConfig};
use crate::tunables::Tunables;

pub use hold::HoldKeys;
pub use keys::{KeyBitmap, EV_KEY, KEY_POWER, KEY_VOLUMEDOWN, KEY_VOLUMEUP};
pub use keytable::{KeyState, KeyTable, DEFAULT_KEY_TABLE};
pub use sequential::SequentialKeys;

/// Reason text handed to the panic path.
pub const CRASH_KEY_REASON: &str = "Crash Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerdict {
    Idle,
    Trigger,
    ArmTimer(Duration),
    CancelTimer,
}

/// One-shot relative timer used by the hold policy. Expiry must call back
/// into [`CrashKeyInput::on_timer_expired`].
pub trait OneShotTimer: Sync {
    fn start(&self, delay: Duration);
    fn cancel(&self);
}

#[derive(Debug, Clone)]
pub enum CrashKeyDetector {
    Sequential(SequentialKeys),
    SimultaneousHold(HoldKeys),
    KeyTable(KeyTable),
}

impl CrashKeyDetector {
    pub fn from_config(config: &DebugConfig, table: &'static [KeyState]) -> Self {
        match config.crash_key {
            CrashKeyPolicy::Sequential => {
                Self::Sequential(SequentialKeys::new(config.crash_key_presses))
            }
            CrashKeyPolicy::SimultaneousHold => {
                Self::SimultaneousHold(HoldKeys::new(config.hold_delay))
            }
            CrashKeyPolicy::KeyTable => {
                Self::KeyTable(KeyTable::new(table, config.crash_key_presses))
            }
        }
    }

    pub fn on_key(&mut self, code: u16, pressed: bool) -> KeyVerdict {
        match self {
            Self::Sequential(keys) => keys.on_key(code, pressed),
            Self::SimultaneousHold(keys) => keys.on_key(code, pressed),
            Self::KeyTable(keys) => keys.on_key(code, pressed),
        }
    }

    pub fn on_timer_expired(&mut self) -> KeyVerdict {
        match self {
            Self::SimultaneousHold(keys) => keys.on_timer_expired(),
            _ => KeyVerdict::Idle,
        }
    }
}

/// What an input device advertises.
#[derive(Debug, Clone, Copy)]
pub struct InputDeviceCaps<'a> {
    pub name: &'a str,
    pub phys: Option<&'a str>,
    /// Bit per supported event type.
    pub ev_bits: u32,
    pub keys: KeyBitmap,
}

impl InputDeviceCaps<'_> {
    pub fn supports(&self, ev_type: u16) -> bool {
        ev_type < 32 && self.ev_bits & (1 << ev_type) != 0
    }
}

/// Input handler feeding key events to a detector.
pub struct CrashKeyInput {
    detector: Mutex<CrashKeyDetector>,
    wanted: KeyBitmap,
    connected: AtomicUsize,
}

impl CrashKeyInput {
    pub fn new(detector: CrashKeyDetector, wanted: KeyBitmap) -> Self {
        Self {
            detector: Mutex::new(detector),
            wanted,
            connected: AtomicUsize::new(0),
        }
    }

    /// Handler for `config`, matching devices that carry every key it uses.
    pub fn from_config(config: &DebugConfig, table: &'static [KeyState]) -> Self {
        let wanted = match config.crash_key {
            CrashKeyPolicy::Sequential => {
                KeyBitmap::from_keys(&[KEY_VOLUMEDOWN, KEY_VOLUMEUP, KEY_POWER])
            }
            CrashKeyPolicy::SimultaneousHold => KeyBitmap::from_keys(&[KEY_VOLUMEDOWN, KEY_VOLUMEUP]),
            CrashKeyPolicy::KeyTable => {
                let mut wanted = KeyBitmap::from_keys(&[KEY_POWER]);
                table.iter().for_each(|state| wanted.set(state.code));
                wanted
            }
        };
        Self::new(CrashKeyDetector::from_config(config, table), wanted)
    }

    pub fn matches(&self, dev: &InputDeviceCaps<'_>) -> bool {
        dev.supports(EV_KEY) && dev.keys.contains_all(&self.wanted)
    }

    /// Attach to `dev` if it matches.
    pub fn connect(&self, dev: &InputDeviceCaps<'_>) -> bool {
        if !self.matches(dev) {
            return false;
        }
        self.connected.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[crashkey] Connected device: {} ({})",
            dev.name,
            dev.phys.unwrap_or("unknown")
        );
        true
    }

    pub fn disconnect(&self, dev: &InputDeviceCaps<'_>) {
        let _ = self
            .connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        log::debug!("[crashkey] Disconnected device: {}", dev.name);
    }

    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }

    /// Feed one raw input event. Non-key events and events arriving while
    /// kernel-fault handling is disabled are dropped.
    pub fn event(&self, tunables: &Tunables, ev_type: u16, code: u16, value: i32) -> KeyVerdict {
        if ev_type != EV_KEY || !tunables.kernel_fault_enabled() {
            return KeyVerdict::Idle;
        }
        self.detector.lock().on_key(code, value != 0)
    }

    pub fn on_timer_expired(&self, tunables: &Tunables) -> KeyVerdict {
        if !tunables.kernel_fault_enabled() {
            return KeyVerdict::Idle;
        }
        self.detector.lock().on_timer_expired()
    }
}
