// src/logging.rs
//
// Bridge log output. Every line goes to stderr with a local `HH:MM:SS.mmm`
// stamp and a severity column; while a session log file is open the same line
// is appended there too.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the "latest log" symlink kept next to the timestamped files.
const LATEST_LINK: &str = "ser2tcp.log";

/// Mirror file. `None` means stderr only.
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
        }
    }
}

fn format_line(level: Level, args: fmt::Arguments<'_>) -> String {
    format!(
        "{} {} {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        level.tag(),
        args
    )
}

/// Backend for `tlog!` and `twarn!`.
#[doc(hidden)]
pub fn write_line(level: Level, args: fmt::Arguments<'_>) {
    let line = format_line(level, args);
    eprintln!("{}", line);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Keeps the log file open. Dropping it closes the file.
#[must_use = "file logging stops when the guard is dropped"]
pub struct FileLogGuard {
    path: PathBuf,
}

impl FileLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLogGuard {
    fn drop(&mut self) {
        stop_file_logging();
    }
}

/// Start mirroring log lines to `<log_dir>/YYYYMMDD-HHMMSS-ser2tcp.log`.
/// On Unix `ser2tcp.log` is pointed at the newest file.
pub fn init_file_logging(log_dir: &Path) -> Result<FileLogGuard, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Cannot create log dir {}: {}", log_dir.display(), e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-ser2tcp.log")
        .to_string();
    let path = log_dir.join(&filename);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Cannot open log file {}: {}", path.display(), e))?;

    #[cfg(unix)]
    {
        let link = log_dir.join(LATEST_LINK);
        let _ = std::fs::remove_file(&link);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &link) {
            write_line(
                Level::Warn,
                format_args!("[logging] Cannot update {}: {}", LATEST_LINK, e),
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    write_line(
        Level::Info,
        format_args!("[logging] Writing log to {}", path.display()),
    );

    Ok(FileLogGuard { path })
}

/// Close the log file, if any. Later lines go to stderr only.
pub fn stop_file_logging() {
    let closed = LOG_FILE
        .lock()
        .map(|mut guard| guard.take().is_some())
        .unwrap_or(false);
    if closed {
        write_line(Level::Info, format_args!("[logging] Log file closed"));
    }
}

/// Informational line.
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::write_line($crate::logging::Level::Info, format_args!($($arg)*))
    };
}

/// Something went wrong on the wire or a session ended abnormally.
macro_rules! twarn {
    ($($arg:tt)*) => {
        $crate::logging::write_line($crate::logging::Level::Warn, format_args!($($arg)*))
    };
}
