//! Kernel message ring.
//!
//! Every formatted log line lands here (see [`crate::logger`]). At failure
//! time the ring is handed to the message dumpers as two fragments, older
//! then newer, which is how the persistent region gets its log tail.
//!
//! The ring keeps the newest bytes: once full, each new byte drops the
//! oldest one.

use spin::Mutex;

/// Default ring capacity (32 KiB).
pub const KMSG_BUFFER_SIZE: usize = 32 * 1024;

struct Ring<const N: usize> {
    bytes: [u8; N],
    /// Index of the oldest byte.
    head: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    fn push(&mut self, data: &[u8]) {
        for &byte in data {
            let pos = (self.head + self.len) % N;
            self.bytes[pos] = byte;
            if self.len < N {
                self.len += 1;
            } else {
                self.head = (self.head + 1) % N;
            }
        }
    }

    fn fragments(&self) -> (&[u8], &[u8]) {
        let end = self.head + self.len;
        if end <= N {
            (&self.bytes[..0], &self.bytes[self.head..end])
        } else {
            (&self.bytes[self.head..], &self.bytes[..end - N])
        }
    }
}

pub struct KmsgRing<const N: usize = KMSG_BUFFER_SIZE> {
    inner: Mutex<Ring<N>>,
}

impl<const N: usize> KmsgRing<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Ring {
                bytes: [0; N],
                head: 0,
                len: 0,
            }),
        }
    }

    /// Append raw bytes.
    pub fn push_bytes(&self, data: &[u8]) {
        self.inner.lock().push(data);
    }

    /// Append unless the ring is locked (e.g. by a dumper on this CPU).
    pub fn try_push_bytes(&self, data: &[u8]) -> bool {
        match self.inner.try_lock() {
            Some(mut ring) => {
                ring.push(data);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the live content as (older, newer) fragments.
    pub fn with_fragments<R>(&self, f: impl FnOnce(&[u8], &[u8]) -> R) -> R {
        let ring = self.inner.lock();
        let (older, newer) = ring.fragments();
        f(older, newer)
    }

    /// Like [`KmsgRing::with_fragments`], but gives up if the ring is locked.
    ///
    /// Used on the failure path, where the lock holder may never run again.
    pub fn try_with_fragments<R>(&self, f: impl FnOnce(&[u8], &[u8]) -> R) -> Option<R> {
        let ring = self.inner.try_lock()?;
        let (older, newer) = ring.fragments();
        Some(f(older, newer))
    }
}

impl<const N: usize> Default for KmsgRing<N> {
    fn default() -> Self {
        Self::new()
    }
}
