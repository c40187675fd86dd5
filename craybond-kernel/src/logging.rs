//! Kernel logging.
//!
//! Installs a `log` facade backend that timestamps records from the
//! physical counter and writes them to the console. The console lock
//! masks IRQs for the duration of a record, so log lines from task and
//! interrupt context cannot interleave.

use core::fmt::Write;

use craybond_pal::{console, timer};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Formatting buffer for one record.
const LOG_LINE_SIZE: usize = 256;

struct LineBuffer {
    data: [u8; LOG_LINE_SIZE],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            data: [0; LOG_LINE_SIZE],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("<invalid utf8>")
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let to_copy = bytes.len().min(LOG_LINE_SIZE - self.len);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let time_ms = timer::now_ms();
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        // Format into a stack buffer first so the console lock is held
        // only for the actual transmit.
        let mut line = LineBuffer::new();
        let _ = write!(
            line,
            "[{:>5}.{:03}] {} {}: {}\n",
            time_ms / 1000,
            time_ms % 1000,
            level,
            record.target(),
            record.args()
        );
        console::puts(line.as_str());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .ok();
}
