//! Generalized matcher driven by a table of required key states.
//!
//! Each table entry names a key and the state (pressed or released) it must
//! be in. Once every entry matches, each press of the trigger key counts;
//! the configured count fires. Any other key event resets the count.

use super::keys::{KeyBitmap, KEY_POWER};
use super::KeyVerdict;

/// A key and the state it must be in for the combo to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyState {
    pub code: u16,
    pub pressed: bool,
}

impl KeyState {
    pub const fn held(code: u16) -> Self {
        Self {
            code,
            pressed: true,
        }
    }

    pub const fn released(code: u16) -> Self {
        Self {
            code,
            pressed: false,
        }
    }
}

/// Volume-down held, volume-up released.
pub const DEFAULT_KEY_TABLE: &[KeyState] = &[
    KeyState::held(super::keys::KEY_VOLUMEDOWN),
    KeyState::released(super::keys::KEY_VOLUMEUP),
];

#[derive(Debug, Clone)]
pub struct KeyTable {
    states: &'static [KeyState],
    trigger: u16,
    /// One bit per table entry key.
    required: KeyBitmap,
    /// Bits of entries currently in their target state.
    matched: KeyBitmap,
    presses: u32,
    required_presses: u32,
}

impl KeyTable {
    /// Keys start out released, so entries targeting "released" begin matched.
    pub fn new(states: &'static [KeyState], required_presses: u32) -> Self {
        let mut required = KeyBitmap::EMPTY;
        let mut matched = KeyBitmap::EMPTY;
        for state in states {
            required.set(state.code);
            if !state.pressed {
                matched.set(state.code);
            }
        }
        Self {
            states,
            trigger: KEY_POWER,
            required,
            matched,
            presses: 0,
            required_presses,
        }
    }

    pub fn with_trigger(mut self, code: u16) -> Self {
        self.trigger = code;
        self
    }

    pub fn presses(&self) -> u32 {
        self.presses
    }

    pub fn all_matched(&self) -> bool {
        self.matched == self.required
    }

    pub fn on_key(&mut self, code: u16, pressed: bool) -> KeyVerdict {
        if self.states.is_empty() {
            self.presses = 0;
            return KeyVerdict::Idle;
        }

        if code == self.trigger {
            if !self.all_matched() {
                self.presses = 0;
                return KeyVerdict::Idle;
            }
            if pressed {
                self.presses += 1;
                log::debug!("count for enter forced upload : {}", self.presses);
                if self.presses == self.required_presses {
                    return KeyVerdict::Trigger;
                }
            }
            return KeyVerdict::Idle;
        }

        if let Some(state) = self.states.iter().find(|state| state.code == code) {
            if state.pressed == pressed {
                self.matched.set(code);
            } else {
                self.matched.clear(code);
            }
        }
        self.presses = 0;
        KeyVerdict::Idle
    }
}
