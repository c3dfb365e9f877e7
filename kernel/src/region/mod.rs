//! The persistent crash window.
//!
//! A fixed physical range, reserved at early boot, whose contents survive a
//! warm reset. The recorder is its only writer; the next boot stage (or an
//! offline tool) is its only reader, and never at the same time.
//!
//! See [`layout`] for the byte layout. Writes go through [`RegionMemory`],
//! so the same code drives a mapped physical window on hardware and a plain
//! byte array in the simulator.

pub mod layout;
pub mod tail;

use core::ptr::NonNull;

use crate::arch::CacheOps;

pub use layout::{
    RegionError, RegionImage, RegionState, CLEAN_MAGIC, LOG_LEN, LOG_OFFSET, MAGIC_COPY_OFFSET,
    MAGIC_OFFSET, PANIC_MAGIC, REASON_LEN, REASON_OFFSET, REGION_SIZE,
};
pub use tail::{select_tail, TailBudget};

/// Backing store of the window. Offsets are relative to its base.
pub trait RegionMemory: Sync {
    fn write(&self, offset: usize, bytes: &[u8]);
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Virtual address of the window, for the layout descriptor.
    fn base_addr(&self) -> usize {
        0
    }
}

/// A mapped, uncached physical window.
pub struct MappedRegion {
    base: NonNull<u8>,
}

// SAFETY: the window is plain memory; concurrent writers only ever race on
// diagnostic bytes and the recorder serialises the failure path itself.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// # Safety
    ///
    /// `base` must map at least [`REGION_SIZE`] bytes of memory that nothing
    /// else uses, for as long as the returned value lives.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    fn span(offset: usize, len: usize) -> core::ops::Range<usize> {
        let start = offset.min(REGION_SIZE);
        start..(offset.saturating_add(len)).min(REGION_SIZE)
    }
}

impl RegionMemory for MappedRegion {
    fn write(&self, offset: usize, bytes: &[u8]) {
        for (i, &byte) in Self::span(offset, bytes.len()).zip(bytes) {
            // SAFETY: `span` keeps `i` inside the window mapped in `new`.
            unsafe { self.base.as_ptr().add(i).write_volatile(byte) };
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        for (i, slot) in Self::span(offset, buf.len()).zip(buf.iter_mut()) {
            // SAFETY: as above.
            *slot = unsafe { self.base.as_ptr().add(i).read_volatile() };
        }
    }

    fn base_addr(&self) -> usize {
        self.base()
    }
}

/// Writer side of the window.
pub struct PersistentRegion<'a> {
    mem: &'a dyn RegionMemory,
    cache: &'a dyn CacheOps,
    budget: TailBudget,
}

impl<'a> PersistentRegion<'a> {
    /// The byte budget is capped at the log slot.
    pub fn new(mem: &'a dyn RegionMemory, cache: &'a dyn CacheOps, budget: TailBudget) -> Self {
        let budget = TailBudget {
            bytes: budget.bytes.min(LOG_LEN),
            ..budget
        };
        Self { mem, cache, budget }
    }

    pub fn base_addr(&self) -> usize {
        self.mem.base_addr()
    }

    /// Write both magic copies and, if given, the reason; then flush caches.
    pub fn set_magic(&self, magic: u32, reason: Option<&[u8]>) {
        log::error!("set_magic: {:#010x}", magic);

        let raw = layout::encode_magic(magic);
        self.mem.write(MAGIC_OFFSET, &raw);
        self.mem.write(MAGIC_COPY_OFFSET, &raw);
        if let Some(reason) = reason {
            self.mem.write(REASON_OFFSET, &layout::encode_reason(reason));
        }

        self.cache.flush_all();
    }

    /// Store the tail of the two kernel-log fragments in the log slot.
    ///
    /// Returns the number of bytes stored. The rest of the slot is zeroed.
    pub fn append_kernel_log_tail(&self, older: &[u8], newer: &[u8]) -> usize {
        let (older, newer) = select_tail(older, newer, self.budget);
        let mut slot = [0u8; LOG_LEN];
        slot[..older.len()].copy_from_slice(older);
        slot[older.len()..older.len() + newer.len()].copy_from_slice(newer);
        self.mem.write(LOG_OFFSET, &slot);
        older.len() + newer.len()
    }

    /// Copy the window into `out` and decode it.
    pub fn read_image<'b>(&self, out: &'b mut [u8]) -> Result<RegionImage<'b>, RegionError> {
        if out.len() < REGION_SIZE {
            return Err(RegionError::BufferTooSmall {
                needed: REGION_SIZE,
                got: out.len(),
            });
        }
        self.mem.read(0, &mut out[..REGION_SIZE]);
        RegionImage::parse(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Ram(Mutex<Vec<u8>>);

    impl Ram {
        fn new() -> Self {
            Ram(Mutex::new(vec![0xa5; REGION_SIZE]))
        }
    }

    impl RegionMemory for Ram {
        fn write(&self, offset: usize, bytes: &[u8]) {
            self.0.lock().unwrap()[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        fn read(&self, offset: usize, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0.lock().unwrap()[offset..offset + buf.len()]);
        }
    }

    #[derive(Default)]
    struct CountingCache(AtomicU32);

    impl CacheOps for CountingCache {
        fn flush_inner(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
        fn flush_outer(&self) {
            self.0.fetch_add(0x100, Ordering::Relaxed);
        }
    }

    #[test]
    fn set_magic_writes_both_copies_and_flushes() {
        let ram = Ram::new();
        let cache = CountingCache::default();
        let region = PersistentRegion::new(&ram, &cache, TailBudget::DEFAULT);

        region.set_magic(PANIC_MAGIC, Some(b"oops"));
        let mut buf = vec![0u8; REGION_SIZE];
        let image = region.read_image(&mut buf).unwrap();
        assert_eq!(image.validate(), Ok(PANIC_MAGIC));
        assert_eq!(image.reason(), b"oops");
        assert_eq!(cache.0.load(Ordering::Relaxed), 0x101);
    }

    #[test]
    fn clean_magic_leaves_reason_alone() {
        let ram = Ram::new();
        let cache = CountingCache::default();
        let region = PersistentRegion::new(&ram, &cache, TailBudget::DEFAULT);

        region.set_magic(PANIC_MAGIC, Some(b"first"));
        region.set_magic(CLEAN_MAGIC, None);
        let mut buf = vec![0u8; REGION_SIZE];
        let image = region.read_image(&mut buf).unwrap();
        assert_eq!(image.state(), Ok(RegionState::Clean));
        assert_eq!(image.reason(), b"first");
    }

    #[test]
    fn log_tail_is_zero_padded() {
        let ram = Ram::new();
        let cache = CountingCache::default();
        let region = PersistentRegion::new(&ram, &cache, TailBudget::DEFAULT);

        assert_eq!(region.append_kernel_log_tail(b"boot\n", b"panic\n"), 11);
        let mut buf = vec![0u8; REGION_SIZE];
        let image = region.read_image(&mut buf).unwrap();
        assert_eq!(image.log_tail(), b"boot\npanic\n");
        assert!(buf[LOG_OFFSET + 11..LOG_OFFSET + LOG_LEN].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_budget_is_capped_at_slot() {
        let ram = Ram::new();
        let cache = CountingCache::default();
        let budget = TailBudget {
            bytes: LOG_LEN + 64,
            lines: 50,
        };
        let region = PersistentRegion::new(&ram, &cache, budget);

        let newer = vec![b'k'; 4096];
        assert_eq!(region.append_kernel_log_tail(b"", &newer), LOG_LEN);
        let mut buf = vec![0u8; REGION_SIZE];
        let image = region.read_image(&mut buf).unwrap();
        assert_eq!(image.log_tail().len(), LOG_LEN);
        assert!(image.log_tail().iter().all(|&b| b == b'k'));
    }

    #[test]
    fn mapped_region_clips_to_window() {
        let mut backing = vec![0u8; REGION_SIZE + 8];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let region = unsafe { MappedRegion::new(base) };

        region.write(REGION_SIZE - 2, &[1, 2, 3, 4]);
        assert_eq!(&backing[REGION_SIZE - 2..REGION_SIZE + 2], &[1, 2, 0, 0]);
    }
}
