//! Decoupled logging pipeline for patch and build runs.
//!
//! Every `log::*` record goes through an unbounded channel to a background
//! persister thread, so callers never block on disk I/O.
//!
//! ```text
//! log::info!(...) / log_parsed!(...)
//!     |
//! [LogCollector] (log::Log impl)
//!     | (crossbeam unbounded channel)
//!     v
//! [DiskPersister thread] ──► logs/full/<ts>_full.log     (every record)
//!                       ──► logs/parsed/<ts>_parsed.log (target "parsed")
//!                       ──► stderr                       (level-filtered)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log target for high-level status lines mirrored into the parsed log.
pub const PARSED_TARGET: &str = "parsed";

/// Log a high-level status line to both the full and the parsed log.
#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {
        $crate::log::info!(target: $crate::log_collector::PARSED_TARGET, $($arg)*)
    };
}

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    pub level: Level,
    /// Mirrored to the parsed log as well
    pub parsed: bool,
    /// `HH:MM:SS.mmm`
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            message,
            level,
            parsed: false,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            parsed: true,
            ..LogLine::new(Level::Info, message)
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Session log files, one pair per process run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLogs {
    pub full: PathBuf,
    pub parsed: PathBuf,
}

impl SessionLogs {
    fn create(log_dir: &Path) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let parsed_dir = log_dir.join("parsed");
        fs::create_dir_all(&full_dir).map_err(|e| format!("Failed to create full log dir: {}", e))?;
        fs::create_dir_all(&parsed_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Ok(SessionLogs {
            full: full_dir.join(format!("{}_full.log", stamp)),
            parsed: parsed_dir.join(format!("{}_parsed.log", stamp)),
        })
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

/// Logger that persists to disk and echoes to stderr.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    session: SessionLogs,
    console_level: LevelFilter,
}

impl LogCollector {
    /// Create the session files under `log_dir` and start the persister thread.
    pub fn new(log_dir: &Path, console_level: LevelFilter) -> Result<Self, String> {
        let session = SessionLogs::create(log_dir)?;
        let mut full = open_append(&session.full)?;
        let mut parsed = open_append(&session.parsed)?;

        let (tx, rx) = unbounded::<LogMessage>();
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let formatted = line.formatted();
                        let _ = full.write_all(formatted.as_bytes());
                        if line.parsed {
                            let _ = parsed.write_all(formatted.as_bytes());
                        }
                        if console_level >= line.level {
                            eprint!("{}", formatted);
                        }
                    }
                    LogMessage::Flush(done) => {
                        let _ = full.flush();
                        let _ = parsed.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            session,
            console_level,
        })
    }

    /// Install as the global `log` backend. File logs always capture debug.
    pub fn install(self) -> Result<Self, String> {
        let handle = self.clone();
        log::set_boxed_logger(Box::new(self))
            .map(|()| log::set_max_level(LevelFilter::Debug))
            .map_err(|e| format!("Failed to set global logger: {}", e))?;
        Ok(handle)
    }

    pub fn session(&self) -> &SessionLogs {
        &self.session
    }

    pub fn console_level(&self) -> LevelFilter {
        self.console_level
    }

    /// Send a log line. Never blocks.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until every line sent before this call is written.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv().map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if record.target() == PARSED_TARGET {
            self.log_line(LogLine::parsed(message));
        } else {
            self.log_line(LogLine::new(record.level(), message));
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_collector_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(dir.path(), LevelFilter::Off).unwrap();

        assert!(dir.path().join("full").is_dir());
        assert!(dir.path().join("parsed").is_dir());
        assert!(collector.session().full.exists());
        assert!(collector.session().parsed.exists());
    }

    #[test]
    fn test_parsed_lines_go_to_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(dir.path(), LevelFilter::Off).unwrap();

        collector.log_line(LogLine::new(Level::Debug, "[Applier] detail".to_string()));
        collector.log_line(LogLine::parsed("[Pipeline] Plan ready".to_string()));
        collector.wait_for_empty().unwrap();

        let full = fs::read_to_string(&collector.session().full).unwrap();
        let parsed = fs::read_to_string(&collector.session().parsed).unwrap();
        assert!(full.contains("[DEBUG] [Applier] detail"));
        assert!(full.contains("[INFO] [Pipeline] Plan ready"));
        assert!(!parsed.contains("detail"));
        assert!(parsed.contains("Plan ready"));
    }

    #[test]
    fn test_non_blocking_burst() {
        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(dir.path(), LevelFilter::Off).unwrap();
        for i in 0..1000 {
            collector.log_line(LogLine::new(Level::Info, format!("Log message {}", i)));
        }
        collector.wait_for_empty().unwrap();

        let full = fs::read_to_string(&collector.session().full).unwrap();
        assert_eq!(full.lines().count(), 1000);
    }
}
