//! `log` backend that writes into the kernel message ring.
//!
//! Each record is formatted as `[LEVEL] target: message` into a fixed stack
//! buffer (long messages are cut), appended to the [`KmsgRing`], and echoed
//! to the console sink if one is attached. Nothing here allocates or blocks:
//! if the ring is locked (a dumper is reading it on this CPU) the line only
//! goes to the console.

use core::fmt::Write;

use conquer_once::spin::OnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::fmtbuf::BufferWriter;
use crate::kmsg::KmsgRing;

/// Longest line stored, newline included.
const LINE_MAX: usize = 512;

/// Where log lines are echoed (UART, host stdout...).
pub trait ConsoleSink: Sync {
    fn write_line(&self, line: &str);
}

pub struct KmsgLogger {
    ring: &'static KmsgRing,
    console: Option<&'static dyn ConsoleSink>,
    level: LevelFilter,
}

impl KmsgLogger {
    pub const fn new(ring: &'static KmsgRing, level: LevelFilter) -> Self {
        Self {
            ring,
            console: None,
            level,
        }
    }

    pub fn with_console(mut self, console: &'static dyn ConsoleSink) -> Self {
        self.console = Some(console);
        self
    }

    /// Format `record` into `buf`, returning the line length (newline included).
    fn format(record: &Record<'_>, buf: &mut [u8; LINE_MAX]) -> usize {
        let mut len = {
            let mut writer = BufferWriter::new(&mut buf[..LINE_MAX - 1]);
            let _ = write!(
                writer,
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
            writer.len()
        };
        buf[len] = b'\n';
        len += 1;
        len
    }
}

impl Log for KmsgLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut buf = [0u8; LINE_MAX];
        let len = Self::format(record, &mut buf);
        self.ring.try_push_bytes(&buf[..len]);

        if let Some(console) = self.console {
            // A cut may split a UTF-8 sequence; print what decodes.
            let line = match core::str::from_utf8(&buf[..len - 1]) {
                Ok(line) => line,
                Err(err) => core::str::from_utf8(&buf[..err.valid_up_to()]).unwrap_or(""),
            };
            console.write_line(line);
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceCell<KmsgLogger> = OnceCell::uninit();

/// Install `logger` as the global `log` backend. Only the first call wins.
pub fn init(logger: KmsgLogger) -> Result<(), SetLoggerError> {
    let level = logger.level;
    let _ = LOGGER.try_init_once(|| logger);
    if let Ok(installed) = LOGGER.try_get() {
        log::set_logger(installed)?;
        log::set_max_level(level);
    }
    Ok(())
}
