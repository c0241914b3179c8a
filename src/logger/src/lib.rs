// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A thin backend for the `log` facade. Records are written through a shared
//! buffered writer (stderr or a configured file); the process holds the
//! returned [`Drain`] and flushes it on shutdown.

pub use log::{debug, error, info, log_enabled, trace, warn, Level, LevelFilter};

use config::DebugConfig;

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Logs an error and terminates the process.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::error!($($arg)*);
        eprintln!($($arg)*);
        std::process::exit(1);
    }};
}

/// Held by the process for the lifetime of logging; flushed on shutdown.
pub trait Drain: Send {
    fn flush(&mut self) -> std::io::Result<()>;
}

type Writer = Arc<Mutex<BufWriter<Box<dyn Write + Send>>>>;

struct Logger {
    level: LevelFilter,
    writer: Writer,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(
                writer,
                "{} {} [{}] {}",
                humantime::format_rfc3339_millis(SystemTime::now()),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

struct LogDrain {
    writer: Writer,
}

impl Drain for LogDrain {
    fn flush(&mut self) -> std::io::Result<()> {
        self.writer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log writer poisoned"))?
            .flush()
    }
}

pub struct LogBuilder {
    level: LevelFilter,
    file: Option<String>,
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file: None,
        }
    }
}

impl LogBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Write to the named file instead of stderr.
    pub fn output_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    /// Installs the global logger and returns the drain. If a logger is
    /// already installed (integration tests launching more than one
    /// instance) the existing one is left in place.
    pub fn activate(self) -> Box<dyn Drain> {
        let output: Box<dyn Write + Send> = match self.file {
            Some(ref file) => match OpenOptions::new().create(true).append(true).open(file) {
                Ok(f) => Box::new(f),
                Err(e) => {
                    eprintln!("could not open log file {}: {}", file, e);
                    std::process::exit(1);
                }
            },
            None => Box::new(std::io::stderr()),
        };

        let writer: Writer = Arc::new(Mutex::new(BufWriter::new(output)));

        let logger = Logger {
            level: self.level,
            writer: writer.clone(),
        };

        if log::set_boxed_logger(Box::new(logger)).is_ok() {
            log::set_max_level(self.level);
        }

        Box::new(LogDrain { writer })
    }
}

pub fn configure_logging<T: DebugConfig>(config: &T) -> Box<dyn Drain> {
    let mut builder = LogBuilder::new().log_level(config.debug().log_level());
    if let Some(file) = config.debug().log_file() {
        builder = builder.output_file(file);
    }
    builder.activate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_installs_the_global_logger() {
        let path = std::env::temp_dir().join(format!("gateway-logger-{}", std::process::id()));

        let mut drain = LogBuilder::new()
            .log_level(LevelFilter::Debug)
            .output_file(path.to_str().unwrap())
            .activate();

        info!("logger activated");
        drain.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("INFO"));
        assert!(contents.contains("logger activated"));
        let _ = std::fs::remove_file(&path);
    }
}
