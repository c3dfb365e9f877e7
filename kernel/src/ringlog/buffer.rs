//! Lock-free overwrite ring used by every trace stream.
//!
//! # Design
//!
//! - Fixed number of slots `N`, a power of two, indexed with a bitmask
//! - One atomic sequence counter; a writer claims a slot with a single
//!   `fetch_add` and then stores the record words with relaxed ordering
//! - Oldest records are silently overwritten
//! - Concurrent writers on the same ring each get a distinct slot, so a record
//!   is never interleaved with another one (a reader racing a writer may see a
//!   half-written slot; post-mortem readers run after the writers have stopped)
//!
//! # Zero state
//!
//! An all-zero `RingBuffer` is a valid empty ring. Hosts may therefore place
//! large logs in zeroed memory instead of building them on the stack.
//!
//! ```text
//! +----------------------+
//! | slots[0..N][0..W]    |  N * W * 8 bytes
//! +----------------------+
//! | next                 |  sequence of the next write
//! +----------------------+
//! | full                 |  set once N records have been written
//! +----------------------+
//! ```
//!
//! `next` wraps at 2^32; `full` keeps the ring reporting N records after that.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::record::Record;

/// Overwrite ring of `N` records of `W` words each.
#[repr(C)]
pub struct RingBuffer<R, const N: usize, const W: usize> {
    slots: [[AtomicU64; W]; N],
    next: AtomicU32,
    full: AtomicBool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record<W>, const N: usize, const W: usize> RingBuffer<R, N, W> {
    const MASK: usize = N - 1;

    const VALID: () = assert!(
        N.is_power_of_two() && N <= 1 << 31,
        "ring capacity must be a power of two"
    );

    pub const fn new() -> Self {
        let () = Self::VALID;
        Self {
            slots: [const { [const { AtomicU64::new(0) }; W] }; N],
            next: AtomicU32::new(0),
            full: AtomicBool::new(false),
            _record: PhantomData,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append a record, returning the slot it landed in.
    #[inline]
    pub fn push(&self, record: &R) -> usize {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let idx = seq as usize & Self::MASK;
        for (slot, word) in self.slots[idx].iter().zip(record.encode()) {
            slot.store(word, Ordering::Relaxed);
        }
        if seq as usize == N - 1 {
            self.full.store(true, Ordering::Relaxed);
        }
        idx
    }

    /// Index of the most recently claimed slot.
    ///
    /// Reads as all-ones before the first write, so `cursor() + 1` (wrapping)
    /// is always the number of writes modulo 2^32.
    pub fn cursor(&self) -> u32 {
        self.next.load(Ordering::Relaxed).wrapping_sub(1)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        if self.full.load(Ordering::Relaxed) {
            N
        } else {
            (self.next.load(Ordering::Relaxed) as usize).min(N)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read back a single slot.
    pub fn get(&self, idx: usize) -> R {
        let mut words = [0u64; W];
        for (word, slot) in words.iter_mut().zip(&self.slots[idx & Self::MASK]) {
            *word = slot.load(Ordering::Relaxed);
        }
        R::decode(&words)
    }

    pub fn latest(&self) -> Option<R> {
        if self.is_empty() {
            None
        } else {
            Some(self.get(self.cursor() as usize))
        }
    }

    /// Held records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = R> + '_ {
        let count = self.len();
        let newest = self.cursor() as usize & Self::MASK;
        let start = (newest + 1 + N - count) & Self::MASK;
        (0..count).map(move |i| self.get(start + i))
    }

    /// Wrapping sum of every byte in every slot.
    pub fn byte_sum(&self) -> u32 {
        self.slots
            .iter()
            .flatten()
            .map(|slot| {
                slot.load(Ordering::Relaxed)
                    .to_le_bytes()
                    .iter()
                    .fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
            })
            .fold(0u32, u32::wrapping_add)
    }

    /// Address of the slot array, for the layout descriptor.
    pub fn slots_addr(&self) -> usize {
        self.slots.as_ptr() as usize
    }

    pub fn cursor_addr(&self) -> usize {
        &self.next as *const AtomicU32 as usize
    }

    /// Size in bytes of one slot.
    pub const fn slot_size(&self) -> usize {
        W * 8
    }

    #[cfg(test)]
    fn set_sequence(&self, seq: u32) {
        self.next.store(seq, Ordering::Relaxed);
    }
}

impl<R: Record<W>, const N: usize, const W: usize> Default for RingBuffer<R, N, W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ringlog::record::TimerRecord;

    fn timer(time: u64) -> TimerRecord {
        TimerRecord {
            time,
            kind: 1,
            func: 0xc000_0000 + time as usize,
        }
    }

    #[test]
    fn starts_empty_with_all_ones_cursor() {
        let ring: RingBuffer<TimerRecord, 8, 3> = RingBuffer::new();
        assert!(ring.is_empty());
        assert_eq!(ring.cursor(), u32::MAX);
        assert!(ring.latest().is_none());
        assert_eq!(ring.byte_sum(), 0);
    }

    #[test]
    fn first_write_lands_in_slot_zero() {
        let ring: RingBuffer<TimerRecord, 8, 3> = RingBuffer::new();
        assert_eq!(ring.push(&timer(1)), 0);
        assert_eq!(ring.cursor(), 0);
        assert_eq!(ring.latest(), Some(timer(1)));
    }

    #[test]
    fn holds_exactly_the_last_n_after_wrap() {
        let ring: RingBuffer<TimerRecord, 8, 3> = RingBuffer::new();
        for t in 0..21 {
            ring.push(&timer(t));
        }
        assert_eq!(ring.len(), 8);
        let times: Vec<u64> = ring.iter().map(|r| r.time).collect();
        assert_eq!(times, (13..21).collect::<Vec<_>>());
        assert_eq!(ring.cursor() as usize & 7, 20 & 7);
    }

    #[test]
    fn full_ring_stays_full_across_counter_wrap() {
        let ring: RingBuffer<TimerRecord, 8, 3> = RingBuffer::new();
        for t in 0..8 {
            ring.push(&timer(t));
        }
        ring.set_sequence(u32::MAX - 1);
        for t in 100..103 {
            ring.push(&timer(t));
        }

        assert_eq!(ring.cursor(), 0);
        assert!(!ring.is_empty());
        assert_eq!(ring.len(), 8);
        assert_eq!(ring.latest(), Some(timer(102)));
        let times: Vec<u64> = ring.iter().map(|r| r.time).collect();
        assert_eq!(times.len(), 8);
        assert_eq!(&times[5..], &[100, 101, 102]);
    }

    #[test]
    fn partial_fill_iterates_oldest_first() {
        let ring: RingBuffer<TimerRecord, 8, 3> = RingBuffer::new();
        for t in 0..3 {
            ring.push(&timer(t));
        }
        let times: Vec<u64> = ring.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0, 1, 2]);
    }

    #[test]
    fn concurrent_writers_never_share_a_slot() {
        static RING: RingBuffer<TimerRecord, 1024, 3> = RingBuffer::new();
        let handles: Vec<_> = (0..4u64)
            .map(|w| {
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        RING.push(&TimerRecord {
                            time: w * 1000 + i,
                            kind: w as u32,
                            func: (w * 1000 + i) as usize,
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(RING.len(), 800);
        let mut seen: Vec<u64> = RING.iter().map(|r| r.time).collect();
        for rec in RING.iter() {
            assert_eq!(rec.func as u64, rec.time, "record torn");
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 800);
    }
}
