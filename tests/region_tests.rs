mod shared_board;

use kernel::region::{
    select_tail, RegionError, RegionImage, RegionState, TailBudget, LOG_LEN, MAGIC_COPY_OFFSET,
    REASON_LEN, REGION_SIZE,
};
use kernel::{CpuId, PANIC_MAGIC};
use shared_board::{assert_resets, booted, with_region};

/// An orderly reboot clears the magic
#[test]
fn test_reboot_clears_magic() {
    let bench = booted();
    with_region(&bench, |image| {
        assert_eq!(image.state(), Ok(RegionState::UploadPending))
    });

    bench.kernel.printk("<5>[   10.000000] reboot: Restarting system");
    bench.kernel.reboot();

    with_region(&bench, |image| {
        assert_eq!(image.state(), Ok(RegionState::Clean));
        assert_eq!(image.magic_copy(), 0);
        assert!(String::from_utf8_lossy(image.log_tail()).contains("Restarting system"));
    });
}

/// A torn magic write is reported rather than trusted
#[test]
fn test_torn_magic_detected() {
    let bench = booted();
    bench.region.poke(MAGIC_COPY_OFFSET, &0u32.to_le_bytes());
    with_region(&bench, |image| {
        assert_eq!(
            image.state(),
            Err(RegionError::MagicMismatch {
                primary: PANIC_MAGIC,
                copy: 0
            })
        );
    });
}

#[test]
fn test_short_buffer_rejected() {
    let bytes = vec![0u8; REGION_SIZE - 1];
    assert_eq!(
        RegionImage::parse(&bytes).err(),
        Some(RegionError::Truncated {
            len: REGION_SIZE - 1
        })
    );
}

/// Reasons longer than the slot are cut to the slot
#[test]
fn test_long_reason_truncated() {
    let bench = booted();
    let reason = "r".repeat(REASON_LEN + 100);
    assert_resets(&bench, || bench.panic(CpuId::BOOT, &reason));
    with_region(&bench, |image| {
        assert_eq!(image.reason().len(), REASON_LEN);
        assert!(image.reason().iter().all(|&b| b == b'r'));
    });
}

/// Log text without newlines is kept up to the byte budget
#[test]
fn test_tail_without_newlines_fills_slot() {
    let newer = vec![b'a'; LOG_LEN + 500];
    let (older, kept) = select_tail(b"older\n", &newer, TailBudget::DEFAULT);
    assert!(older.is_empty());
    assert_eq!(kept.len(), LOG_LEN);
}

/// Reference walk over the concatenated fragments.
fn brute_force_tail(older: &[u8], newer: &[u8], budget: TailBudget) -> Vec<u8> {
    let all: Vec<u8> = older.iter().chain(newer).copied().collect();
    let (mut bytes, mut lines) = (budget.bytes, budget.lines);
    let mut kept = 0;
    for &b in all.iter().rev() {
        if bytes == 0 || lines == 0 {
            break;
        }
        bytes -= 1;
        if b == b'\n' {
            lines -= 1;
        }
        kept += 1;
    }
    all[all.len() - kept..].to_vec()
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> usize {
        (self.next() % n) as usize
    }

    fn text(&mut self, max: u64) -> Vec<u8> {
        let len = self.below(max);
        (0..len)
            .map(|_| if self.below(8) == 0 { b'\n' } else { b'x' })
            .collect()
    }
}

/// The selected tail always equals the reference walk
#[test]
fn test_tail_matches_reference_walk() {
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    for round in 0..500 {
        let older = rng.text(200);
        let newer = rng.text(200);
        let budget = TailBudget {
            bytes: 1 + rng.below(150),
            lines: 1 + rng.below(12),
        };

        let (o, n) = select_tail(&older, &newer, budget);
        let got: Vec<u8> = o.iter().chain(n).copied().collect();
        assert_eq!(
            got,
            brute_force_tail(&older, &newer, budget),
            "round {} budget {:?}",
            round,
            budget
        );
        assert!(got.len() <= budget.bytes);
        assert!(got.iter().filter(|&&b| b == b'\n').count() <= budget.lines);
    }
}
