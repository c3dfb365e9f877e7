//! Semaphore holder tracking.
//!
//! Two fixed pools (plain and read/write semaphores) of holder records. An
//! acquire moves a free record to the in-use set, a release moves the
//! matching record back. Each pool has one spin lock, held only for the
//! constant-size scan. A full pool silently drops the acquire; the semaphore
//! operation itself is never affected.
//!
//! Tracking does nothing until [`WaitTracker::init`] runs.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::percpu::CpuId;

pub const SEMAPHORE_LOG_MAX: usize = 100;
pub const RWSEMAPHORE_LOG_MAX: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    /// Address of the semaphore.
    pub sem: usize,
    pub pid: i32,
    pub cpu: CpuId,
    pub direction: Option<Direction>,
}

struct Pool<const N: usize> {
    slots: [Option<Holder>; N],
    in_use: usize,
}

impl<const N: usize> Pool<N> {
    const fn new() -> Self {
        Self {
            slots: [None; N],
            in_use: 0,
        }
    }

    fn take(&mut self, holder: Holder) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(holder);
                self.in_use += 1;
                true
            }
            None => false,
        }
    }

    fn give_back(&mut self, sem: usize, pid: i32) -> bool {
        let found = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(h) if h.sem == sem && h.pid == pid));
        match found {
            Some(slot) => {
                *slot = None;
                self.in_use -= 1;
                true
            }
            None => false,
        }
    }
}

/// One tracked pool.
pub struct HolderLog<const N: usize> {
    pool: Mutex<Pool<N>>,
    ready: AtomicBool,
}

impl<const N: usize> HolderLog<N> {
    pub const fn new() -> Self {
        Self {
            pool: Mutex::new(Pool::new()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn init(&self) {
        *self.pool.lock() = Pool::new();
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record an acquire. Returns whether it was tracked.
    pub fn down(&self, holder: Holder) -> bool {
        self.is_ready() && self.pool.lock().take(holder)
    }

    /// Record a release. Returns whether a matching acquire was found.
    pub fn up(&self, sem: usize, pid: i32) -> bool {
        self.is_ready() && self.pool.lock().give_back(sem, pid)
    }

    pub fn in_use(&self) -> usize {
        self.pool.lock().in_use
    }

    pub fn free(&self) -> usize {
        if self.is_ready() {
            N - self.in_use()
        } else {
            0
        }
    }

    /// Visit current holders.
    pub fn for_each_holder(&self, mut visit: impl FnMut(&Holder)) {
        let pool = self.pool.lock();
        pool.slots.iter().flatten().for_each(|holder| visit(holder));
    }
}

impl<const N: usize> Default for HolderLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Both pools.
pub struct WaitTracker {
    sem: HolderLog<SEMAPHORE_LOG_MAX>,
    rwsem: HolderLog<RWSEMAPHORE_LOG_MAX>,
}

impl WaitTracker {
    pub const fn new() -> Self {
        Self {
            sem: HolderLog::new(),
            rwsem: HolderLog::new(),
        }
    }

    pub fn init(&self) {
        self.sem.init();
        self.rwsem.init();
    }

    pub fn sem_down(&self, sem: usize, pid: i32, cpu: CpuId) -> bool {
        self.sem.down(Holder {
            sem,
            pid,
            cpu,
            direction: None,
        })
    }

    pub fn sem_up(&self, sem: usize, pid: i32) -> bool {
        self.sem.up(sem, pid)
    }

    pub fn rwsem_down(&self, sem: usize, pid: i32, cpu: CpuId, direction: Direction) -> bool {
        self.rwsem.down(Holder {
            sem,
            pid,
            cpu,
            direction: Some(direction),
        })
    }

    pub fn rwsem_up(&self, sem: usize, pid: i32) -> bool {
        self.rwsem.up(sem, pid)
    }

    pub fn semaphores(&self) -> &HolderLog<SEMAPHORE_LOG_MAX> {
        &self.sem
    }

    pub fn rw_semaphores(&self) -> &HolderLog<RWSEMAPHORE_LOG_MAX> {
        &self.rwsem
    }
}

impl Default for WaitTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_tracked_before_init() {
        let tracker = WaitTracker::new();
        assert!(!tracker.sem_down(0x1000, 1, CpuId::BOOT));
        assert_eq!(tracker.semaphores().in_use(), 0);
        assert_eq!(tracker.semaphores().free(), 0);
    }

    #[test]
    fn release_matches_semaphore_and_pid() {
        let tracker = WaitTracker::new();
        tracker.init();
        assert!(tracker.sem_down(0x1000, 1, CpuId::BOOT));
        assert!(tracker.sem_down(0x1000, 2, CpuId::BOOT));

        assert!(!tracker.sem_up(0x1000, 3));
        assert!(tracker.sem_up(0x1000, 1));
        assert_eq!(tracker.semaphores().in_use(), 1);

        let mut pids = Vec::new();
        tracker.semaphores().for_each_holder(|h| pids.push(h.pid));
        assert_eq!(pids, vec![2]);
    }

    #[test]
    fn exhausted_pool_drops_silently() {
        let log: HolderLog<2> = HolderLog::new();
        log.init();
        let holder = |pid| Holder {
            sem: 0x2000,
            pid,
            cpu: CpuId::BOOT,
            direction: Some(Direction::Write),
        };
        assert!(log.down(holder(1)));
        assert!(log.down(holder(2)));
        assert!(!log.down(holder(3)));
        assert_eq!(log.free(), 0);
        assert!(!log.up(0x2000, 3));
        assert!(log.up(0x2000, 2));
        assert_eq!(log.free(), 1);
    }

    #[test]
    fn rw_holders_keep_direction() {
        let tracker = WaitTracker::new();
        tracker.init();
        tracker.rwsem_down(0x3000, 9, CpuId::BOOT, Direction::Read);
        let mut dirs = Vec::new();
        tracker.rw_semaphores().for_each_holder(|h| dirs.push(h.direction));
        assert_eq!(dirs, vec![Some(Direction::Read)]);
    }
}
