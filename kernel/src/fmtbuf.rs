//! Formatting into fixed byte buffers without allocation.

use core::fmt;

/// `fmt::Write` sink over a byte slice that truncates instead of growing.
///
/// Once the buffer is full the writer reports `fmt::Error`, which stops the
/// formatter; whatever fit is kept.
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn written(&self) -> &[u8] {
        &self.buffer[..self.pos]
    }
}

impl fmt::Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;

        if to_write < bytes.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

/// Copy `s` into a NUL-terminated fixed field, truncating to `N - 1` bytes.
pub fn fixed_cstr<const N: usize>(s: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let len = s.len().min(N.saturating_sub(1));
    out[..len].copy_from_slice(&s[..len]);
    out
}

/// Format `args` into a NUL-terminated fixed field, truncating to `N - 1` bytes.
pub fn fixed_fmt<const N: usize>(args: fmt::Arguments<'_>) -> [u8; N] {
    let mut out = [0u8; N];
    let limit = N.saturating_sub(1);
    let mut writer = BufferWriter::new(&mut out[..limit]);
    let _ = fmt::write(&mut writer, args);
    out
}

/// The bytes of a NUL-terminated field, up to (not including) the first NUL.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
