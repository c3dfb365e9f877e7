//! Input event codes and the key bitmap used for device matching.

/// Event type carrying key presses.
pub const EV_KEY: u16 = 0x01;

pub const KEY_VOLUMEDOWN: u16 = 114;
pub const KEY_VOLUMEUP: u16 = 115;
pub const KEY_POWER: u16 = 116;

/// Number of key codes.
pub const KEY_CNT: usize = 0x300;

const WORDS: usize = KEY_CNT / 64;

/// One bit per key code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyBitmap([u64; WORDS]);

impl KeyBitmap {
    pub const EMPTY: Self = Self([0; WORDS]);

    pub const fn from_keys(keys: &[u16]) -> Self {
        let mut map = Self::EMPTY;
        let mut i = 0;
        while i < keys.len() {
            let code = keys[i] as usize;
            if code < KEY_CNT {
                map.0[code / 64] |= 1 << (code % 64);
            }
            i += 1;
        }
        map
    }

    /// Codes outside the key range are ignored.
    pub fn set(&mut self, code: u16) {
        if let Some((word, bit)) = Self::locate(code) {
            self.0[word] |= bit;
        }
    }

    pub fn clear(&mut self, code: u16) {
        if let Some((word, bit)) = Self::locate(code) {
            self.0[word] &= !bit;
        }
    }

    pub fn test(&self, code: u16) -> bool {
        Self::locate(code).is_some_and(|(word, bit)| self.0[word] & bit != 0)
    }

    /// Every bit of `other` is also set here.
    pub fn contains_all(&self, other: &KeyBitmap) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(mine, theirs)| mine & theirs == *theirs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    fn locate(code: u16) -> Option<(usize, u64)> {
        let code = usize::from(code);
        (code < KEY_CNT).then(|| (code / 64, 1u64 << (code % 64)))
    }
}
