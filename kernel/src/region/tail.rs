//! Kernel-log tail selection.
//!
//! The message dumper hands over two fragments, older and newer. The tail is
//! chosen by walking backward from the end of the newer fragment, then on
//! into the older one, one byte at a time against shared budgets:
//!
//! - every consumed byte spends one byte of budget
//! - every consumed `\n` spends one line of budget
//! - the walk stops as soon as either budget reaches zero
//!
//! So the newline that spends the last line is the first byte kept, and a
//! fragment without newlines is consumed up to the byte budget.

/// Byte and line limits for the stored tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailBudget {
    pub bytes: usize,
    pub lines: usize,
}

impl TailBudget {
    pub const DEFAULT: TailBudget = TailBudget {
        bytes: super::LOG_LEN,
        lines: 50,
    };

    fn exhausted(&self) -> bool {
        self.bytes == 0 || self.lines == 0
    }
}

/// Consume the longest suffix of `fragment` the remaining budget allows.
fn take_suffix(fragment: &[u8], budget: &mut TailBudget) -> usize {
    let mut kept = 0;
    for &byte in fragment.iter().rev() {
        if budget.exhausted() {
            break;
        }
        if byte == b'\n' {
            budget.lines -= 1;
        }
        budget.bytes -= 1;
        kept += 1;
    }
    kept
}

/// The selected suffixes of `older` and `newer`, in that order.
///
/// Storing `older_suffix` followed by `newer_suffix` gives the tail.
pub fn select_tail<'a>(older: &'a [u8], newer: &'a [u8], budget: TailBudget) -> (&'a [u8], &'a [u8]) {
    let mut budget = budget;
    let newer_kept = take_suffix(newer, &mut budget);
    let older_kept = if newer_kept == newer.len() {
        take_suffix(older, &mut budget)
    } else {
        0
    };
    (&older[older.len() - older_kept..], &newer[newer.len() - newer_kept..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(older: &[u8], newer: &[u8], bytes: usize, lines: usize) -> Vec<u8> {
        let (o, n) = select_tail(older, newer, TailBudget { bytes, lines });
        [o, n].concat()
    }

    #[test]
    fn line_budget_keeps_the_boundary_newline() {
        assert_eq!(tail(b"", b"a\nb\nc\n", 100, 2), b"\nc\n");
    }

    #[test]
    fn byte_budget_cuts_mid_line() {
        assert_eq!(tail(b"", b"hello world", 5, 50), b"world");
    }

    #[test]
    fn spills_into_older_fragment() {
        assert_eq!(tail(b"one\ntwo\n", b"three\n", 100, 3), b"\ntwo\nthree\n");
    }

    #[test]
    fn older_untouched_when_newer_exhausts_budget() {
        assert_eq!(tail(b"old\n", b"x\ny\nz\n", 100, 2), b"\nz\n");
    }

    #[test]
    fn no_newline_consumes_up_to_byte_budget() {
        let older = [b'o'; 40];
        let newer = [b'n'; 30];
        let out = tail(&older, &newer, 50, 50);
        assert_eq!(out.len(), 50);
        assert_eq!(&out[..20], &[b'o'; 20]);
        assert_eq!(&out[20..], &[b'n'; 30]);

        let all = tail(&older, &newer, 4096, 50);
        assert_eq!(all.len(), 70);
    }

    #[test]
    fn empty_fragments() {
        assert!(tail(b"", b"", 10, 10).is_empty());
    }
}
