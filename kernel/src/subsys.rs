//! Self-describing layout table for offline recovery.
//!
//! A recovery tool reading a raw RAM dump has no symbols, so the recorder
//! writes a small little-endian table telling it where each trace ring
//! lives, how big its records are and where the persistent region starts.
//!
//! ```text
//! 0x00  magic[4]      u32 x4
//! 0x10  nr_cpus       u32
//! 0x14  nr_rings      u32
//! 0x18  region_base   u64   physical
//! 0x20  ring[0..5]    RingEntry, 32 bytes each
//!
//! RingEntry:
//! 0x00  buf_paddr     u64   slot array of CPU0
//! 0x08  cursor_paddr  u64   write counter of CPU0
//! 0x10  record_size   u32
//! 0x14  entries       u32
//! 0x18  cpus          u32
//! 0x1C  cpu_stride    u32   bytes between consecutive CPUs' rings
//! ```

use core::fmt;

use crate::arch::BoardOps;
use crate::percpu::{CpuId, MAX_CPUS};
use crate::ringlog::{Record, RingBuffer, SchedLog};

pub const SUBSYS_MAGIC: [u32; 4] = [0x4C47_5350, 0x5342_5359, 0x0000_0001, 0xB3B8_ACAF];

pub const HEADER_SIZE: usize = 0x20;
pub const RING_ENTRY_SIZE: usize = 0x20;
pub const NR_RINGS: usize = 5;
pub const DESCRIPTOR_SIZE: usize = HEADER_SIZE + NR_RINGS * RING_ENTRY_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    BufferTooSmall { needed: usize, got: usize },
    BadMagic,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::BufferTooSmall { needed, got } => {
                write!(f, "layout buffer too small: need {} bytes, got {}", needed, got)
            }
            LayoutError::BadMagic => write!(f, "layout descriptor magic mismatch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingEntry {
    pub buf_paddr: u64,
    pub cursor_paddr: u64,
    pub record_size: u32,
    pub entries: u32,
    pub cpus: u32,
    pub cpu_stride: u32,
}

impl RingEntry {
    fn per_cpu<R: Record<W> + 'static, const N: usize, const W: usize>(
        board: &dyn BoardOps,
        ring: impl Fn(CpuId) -> &'static RingBuffer<R, N, W>,
    ) -> Self {
        let first = ring(CpuId::BOOT);
        let stride = CpuId::new(1)
            .map(|second| ring(second).slots_addr() - first.slots_addr())
            .unwrap_or(0);
        Self {
            cpus: MAX_CPUS as u32,
            cpu_stride: stride as u32,
            ..Self::shared(board, first)
        }
    }

    fn shared<R: Record<W>, const N: usize, const W: usize>(
        board: &dyn BoardOps,
        ring: &RingBuffer<R, N, W>,
    ) -> Self {
        Self {
            buf_paddr: board.virt_to_phys(ring.slots_addr()),
            cursor_paddr: board.virt_to_phys(ring.cursor_addr()),
            record_size: ring.slot_size() as u32,
            entries: ring.capacity() as u32,
            cpus: 1,
            cpu_stride: 0,
        }
    }
}

/// Ring order in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingSlot {
    Task = 0,
    Irq = 1,
    Work = 2,
    Timer = 3,
    Aux = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutDescriptor {
    pub nr_cpus: u32,
    pub region_base: u64,
    pub rings: [RingEntry; NR_RINGS],
}

impl LayoutDescriptor {
    /// Describe `log` and the region at virtual address `region_base`.
    pub fn describe(log: &'static SchedLog, region_base: usize, board: &dyn BoardOps) -> Self {
        Self {
            nr_cpus: MAX_CPUS as u32,
            region_base: board.virt_to_phys(region_base),
            rings: [
                RingEntry::per_cpu(board, |cpu| log.task(cpu)),
                RingEntry::per_cpu(board, |cpu| log.irq(cpu)),
                RingEntry::per_cpu(board, |cpu| log.work(cpu)),
                RingEntry::per_cpu(board, |cpu| log.timer(cpu)),
                RingEntry::shared(board, log.aux_ring()),
            ],
        }
    }

    pub fn ring(&self, slot: RingSlot) -> &RingEntry {
        &self.rings[slot as usize]
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, LayoutError> {
        if out.len() < DESCRIPTOR_SIZE {
            return Err(LayoutError::BufferTooSmall {
                needed: DESCRIPTOR_SIZE,
                got: out.len(),
            });
        }
        for (i, magic) in SUBSYS_MAGIC.iter().enumerate() {
            put(out, i * 4, &magic.to_le_bytes());
        }
        put(out, 0x10, &self.nr_cpus.to_le_bytes());
        put(out, 0x14, &(NR_RINGS as u32).to_le_bytes());
        put(out, 0x18, &self.region_base.to_le_bytes());
        for (i, ring) in self.rings.iter().enumerate() {
            let at = HEADER_SIZE + i * RING_ENTRY_SIZE;
            put(out, at, &ring.buf_paddr.to_le_bytes());
            put(out, at + 0x08, &ring.cursor_paddr.to_le_bytes());
            put(out, at + 0x10, &ring.record_size.to_le_bytes());
            put(out, at + 0x14, &ring.entries.to_le_bytes());
            put(out, at + 0x18, &ring.cpus.to_le_bytes());
            put(out, at + 0x1C, &ring.cpu_stride.to_le_bytes());
        }
        Ok(DESCRIPTOR_SIZE)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LayoutError> {
        if bytes.len() < DESCRIPTOR_SIZE {
            return Err(LayoutError::BufferTooSmall {
                needed: DESCRIPTOR_SIZE,
                got: bytes.len(),
            });
        }
        if (0..4).any(|i| u32_at(bytes, i * 4) != SUBSYS_MAGIC[i]) {
            return Err(LayoutError::BadMagic);
        }
        let mut rings = [RingEntry::default(); NR_RINGS];
        for (i, ring) in rings.iter_mut().enumerate() {
            let at = HEADER_SIZE + i * RING_ENTRY_SIZE;
            *ring = RingEntry {
                buf_paddr: u64_at(bytes, at),
                cursor_paddr: u64_at(bytes, at + 0x08),
                record_size: u32_at(bytes, at + 0x10),
                entries: u32_at(bytes, at + 0x14),
                cpus: u32_at(bytes, at + 0x18),
                cpu_stride: u32_at(bytes, at + 0x1C),
            };
        }
        Ok(Self {
            nr_cpus: u32_at(bytes, 0x10),
            region_base: u64_at(bytes, 0x18),
            rings,
        })
    }
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{BusFloor, InformReg};
    use crate::ringlog::SCHED_LOG_MAX;

    struct Offset;

    impl BoardOps for Offset {
        fn request_bus_floor(&self, _floor: BusFloor) {}
        fn disable_watchdog(&self) {}
        fn write_inform(&self, _reg: InformReg, _value: u32) {}
        fn virt_to_phys(&self, addr: usize) -> u64 {
            addr as u64 + 0x4000_0000
        }
        fn restart(&self) {}
    }

    static LOG: SchedLog = SchedLog::new();

    #[test]
    fn describes_rings_in_physical_space() {
        let desc = LayoutDescriptor::describe(&LOG, 0x1000, &Offset);
        assert_eq!(desc.region_base, 0x4000_1000);
        assert_eq!(desc.nr_cpus, MAX_CPUS as u32);

        let task = desc.ring(RingSlot::Task);
        assert_eq!(task.buf_paddr, LOG.task(CpuId::BOOT).slots_addr() as u64 + 0x4000_0000);
        assert_eq!(task.record_size, 32);
        assert_eq!(task.entries, SCHED_LOG_MAX as u32);
        assert_eq!(task.cpus, MAX_CPUS as u32);
        let cpu1 = CpuId::new(1).unwrap();
        assert_eq!(
            task.buf_paddr + u64::from(task.cpu_stride),
            LOG.task(cpu1).slots_addr() as u64 + 0x4000_0000
        );

        let aux = desc.ring(RingSlot::Aux);
        assert_eq!(aux.cpus, 1);
        assert_eq!(aux.record_size, 144);
    }

    #[test]
    fn encoded_fields_sit_at_documented_offsets() {
        let desc = LayoutDescriptor::describe(&LOG, 0x1000, &Offset);
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        assert_eq!(desc.encode(&mut buf), Ok(DESCRIPTOR_SIZE));
        assert_eq!(u32_at(&buf, 0), SUBSYS_MAGIC[0]);
        assert_eq!(u32_at(&buf, 0x14), NR_RINGS as u32);
        assert_eq!(u64_at(&buf, 0x18), 0x4000_1000);
        // irq ring record size: three words
        assert_eq!(u32_at(&buf, HEADER_SIZE + RING_ENTRY_SIZE + 0x10), 24);
        assert_eq!(LayoutDescriptor::parse(&buf), Ok(desc));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let desc = LayoutDescriptor::describe(&LOG, 0, &Offset);
        let mut buf = [0u8; 16];
        assert_eq!(
            desc.encode(&mut buf),
            Err(LayoutError::BufferTooSmall {
                needed: DESCRIPTOR_SIZE,
                got: 16
            })
        );
        let zeroed = [0u8; DESCRIPTOR_SIZE];
        assert_eq!(LayoutDescriptor::parse(&zeroed), Err(LayoutError::BadMagic));
    }
}
