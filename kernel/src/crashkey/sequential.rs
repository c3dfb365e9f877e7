//! Hold volume-down, keep volume-up off, press power twice.

use super::keys::{KEY_POWER, KEY_VOLUMEDOWN, KEY_VOLUMEUP};
use super::KeyVerdict;

#[derive(Debug, Clone)]
pub struct SequentialKeys {
    vol_up: bool,
    vol_down: bool,
    presses: u32,
    required: u32,
}

impl SequentialKeys {
    pub const fn new(required: u32) -> Self {
        Self {
            vol_up: false,
            vol_down: false,
            presses: 0,
            required,
        }
    }

    pub fn presses(&self) -> u32 {
        self.presses
    }

    pub fn on_key(&mut self, code: u16, pressed: bool) -> KeyVerdict {
        if !pressed {
            match code {
                KEY_VOLUMEUP => self.vol_up = false,
                KEY_VOLUMEDOWN => {
                    self.presses = 0;
                    self.vol_down = false;
                }
                _ => {}
            }
            return KeyVerdict::Idle;
        }

        match code {
            KEY_VOLUMEUP => self.vol_up = true,
            KEY_VOLUMEDOWN => self.vol_down = true,
            _ => {}
        }

        if code == KEY_POWER && self.vol_down && !self.vol_up {
            self.presses += 1;
            log::info!("count for enter forced upload : {}", self.presses);
            if self.presses == self.required {
                return KeyVerdict::Trigger;
            }
        }
        KeyVerdict::Idle
    }
}
