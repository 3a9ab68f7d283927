//! `log` backend that writes the simulation log file
//!
//! Output stops once the line cap is reached so long runs cannot fill the
//! disk; records from every thread share one buffered writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{LevelFilter, Log, Metadata, Record};

use crate::error::Result;

pub struct FileLogger<W: Write + Send = BufWriter<File>> {
    out: Mutex<W>,
    lines: AtomicUsize,
    max_lines: usize,
    level: LevelFilter,
}

impl FileLogger {
    /// Create (truncating) the log file
    pub fn create<P: AsRef<Path>>(path: P, max_lines: usize, level: LevelFilter) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(FileLogger::with_writer(BufWriter::new(file), max_lines, level))
    }
}

impl<W: Write + Send + 'static> FileLogger<W> {
    pub fn with_writer(out: W, max_lines: usize, level: LevelFilter) -> Self {
        FileLogger {
            out: Mutex::new(out),
            lines: AtomicUsize::new(0),
            max_lines,
            level,
        }
    }

    /// Install as the global logger
    pub fn install(self) -> std::result::Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.lines.load(Ordering::Relaxed).min(self.max_lines)
    }

    pub fn into_inner(self) -> Option<W> {
        self.out.into_inner().ok()
    }
}

impl<W: Write + Send> Log for FileLogger<W> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let text = record.args().to_string();
        let n = text.lines().count().max(1);
        let before = self.lines.fetch_add(n, Ordering::Relaxed);
        if before + n > self.max_lines {
            return;
        }
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", text);
        }
    }

    fn flush(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}
