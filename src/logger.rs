use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use colored::Colorize;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Info,
    Debug,
    Warn,
    Error,
}

impl Severity {
    fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn paint(&self, text: &str) -> String {
        match self {
            Severity::Info => text.normal().to_string(),
            Severity::Debug => text.dimmed().to_string(),
            Severity::Warn => text.yellow().to_string(),
            Severity::Error => text.red().bold().to_string(),
        }
    }
}

/// Shared console sink every `SegmentLogger` may optionally mirror to.
/// Serializes writes across concurrently-running segments so lines from
/// different segments never interleave mid-line (`spec.md` §5 "Shared
/// resources").
#[derive(Clone)]
pub struct ConsoleSink {
    inner: Arc<Mutex<()>>,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_line(&self, line: &str) {
        let _guard = self.inner.lock();
        println!("{line}");
    }
}

/// Per-segment timestamped log stream. One instance per segment; the log
/// directory is created on demand and the segment's file is truncated at
/// logger creation, then appended thereafter (`spec.md` §4.3).
///
/// The "currently logging logger" is NOT looked up via thread-local storage
/// (`spec.md` §9 flags this as unsafe once segments are tasks multiplexed
/// onto threads) — callers instead carry the logger explicitly through
/// `ExecutionContext` and pass it to process-runner helpers.
pub struct SegmentLogger {
    segment_name: String,
    file: Mutex<File>,
    console: Option<ConsoleSink>,
}

impl SegmentLogger {
    pub fn new(log_dir: &Path, segment_name: &str, console: Option<ConsoleSink>) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path: PathBuf = log_dir.join(format!("{segment_name}.log"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            segment_name: segment_name.to_string(),
            file: Mutex::new(file),
            console,
        })
    }

    fn prefix(&self) -> String {
        format!(
            "[{}] [{}]",
            Local::now().format("%H:%M:%S%.3f"),
            self.segment_name
        )
    }

    fn emit(&self, severity: Severity, payload: &str) {
        for line in payload.lines() {
            if line.is_empty() {
                continue;
            }
            let plain = format!("{} {}", self.prefix(), line);
            {
                let mut file = self.file.lock();
                let _ = writeln!(file, "{plain}");
            }
            if let Some(console) = &self.console {
                let colored_line = format!(
                    "{} {}",
                    self.prefix().dimmed(),
                    severity.paint(&format!("[{}] {}", severity.label(), line))
                );
                console.write_line(&colored_line);
            }
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(Severity::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.emit(Severity::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Severity::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Severity::Error, message);
    }

    pub fn log_command_start(&self, command: &str) {
        self.emit(Severity::Info, &format!("$ {command}"));
    }

    pub fn log_command_output(&self, text: &str, is_error: bool) {
        self.emit(if is_error { Severity::Error } else { Severity::Info }, text);
    }

    pub fn log_command_complete(&self, _command: &str, exit_code: i32, duration_ms: u64) {
        let mark = if exit_code == 0 { "\u{2713}" } else { "\u{2717}" };
        self.emit(
            Severity::Info,
            &format!("Command {mark} (exit: {exit_code}, {duration_ms}ms)"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_existing_log_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = SegmentLogger::new(dir.path(), "build", None).unwrap();
            logger.info("first run, line one");
            logger.info("first run, line two");
        }
        let logger = SegmentLogger::new(dir.path(), "build", None).unwrap();
        logger.info("second run");

        let contents = std::fs::read_to_string(dir.path().join("build.log")).unwrap();
        assert!(!contents.contains("first run"));
        assert!(contents.contains("second run"));
    }

    #[test]
    fn test_appends_within_a_single_logger_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SegmentLogger::new(dir.path(), "build", None).unwrap();
        logger.info("line one");
        logger.info("line two");

        let contents = std::fs::read_to_string(dir.path().join("build.log")).unwrap();
        assert!(contents.contains("line one"));
        assert!(contents.contains("line two"));
    }

    #[test]
    fn test_blank_lines_in_multiline_output_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SegmentLogger::new(dir.path(), "build", None).unwrap();
        logger.log_command_output("alpha\n\nbeta\n", false);

        let contents = std::fs::read_to_string(dir.path().join("build.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("alpha"));
        assert!(lines[1].ends_with("beta"));
    }

    #[test]
    fn test_log_line_format_matches_spec() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SegmentLogger::new(dir.path(), "build", None).unwrap();
        logger.log_command_start("cargo build");

        let contents = std::fs::read_to_string(dir.path().join("build.log")).unwrap();
        assert!(contents.contains("[build]"));
        assert!(contents.contains("$ cargo build"));
    }
}
