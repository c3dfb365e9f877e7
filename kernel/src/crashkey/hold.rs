//! Hold both volume keys for the configured delay.
//!
//! Reaching the both-held state arms a one-shot timer; releasing either key
//! while armed cancels it. The timer expiring while still armed triggers.

use core::time::Duration;

use super::keys::{KEY_VOLUMEDOWN, KEY_VOLUMEUP};
use super::KeyVerdict;

#[derive(Debug, Clone)]
pub struct HoldKeys {
    vol_up: bool,
    vol_down: bool,
    armed: bool,
    delay: Duration,
}

impl HoldKeys {
    pub const fn new(delay: Duration) -> Self {
        Self {
            vol_up: false,
            vol_down: false,
            armed: false,
            delay,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn on_key(&mut self, code: u16, pressed: bool) -> KeyVerdict {
        let latch = match code {
            KEY_VOLUMEUP => &mut self.vol_up,
            KEY_VOLUMEDOWN => &mut self.vol_down,
            _ => return KeyVerdict::Idle,
        };
        *latch = pressed;

        if pressed {
            if self.vol_up && self.vol_down && !self.armed {
                self.armed = true;
                return KeyVerdict::ArmTimer(self.delay);
            }
        } else if self.armed {
            self.armed = false;
            return KeyVerdict::CancelTimer;
        }
        KeyVerdict::Idle
    }

    pub fn on_timer_expired(&mut self) -> KeyVerdict {
        if core::mem::take(&mut self.armed) {
            KeyVerdict::Trigger
        } else {
            KeyVerdict::Idle
        }
    }
}
