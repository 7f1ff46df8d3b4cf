//! File-backed debug log.
//!
//! The terminal front end owns stdout, so diagnostics go to a size-capped file
//! in the temp directory. Transcript text only reaches the file through
//! [`log_debug_content`], which needs an explicit opt-in.

use crate::config::AppConfig;
use std::{
    env, fs,
    io::Write,
    panic,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_WRITER: OnceLock<Mutex<Option<RotatingFile>>> = OnceLock::new();

/// Path of the rotating debug log.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("voicelink.log")
}

/// Path of the crash log (location only unless content logging is on).
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("voicelink_crash.log")
}

struct RotatingFile {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    bytes_written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_bytes: u64) -> Option<Self> {
        let mut bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if bytes_written > max_bytes {
            let _ = fs::remove_file(&path);
            bytes_written = 0;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some(Self {
            path,
            file,
            max_bytes,
            bytes_written,
        })
    }

    fn truncate(&mut self) {
        if let Ok(file) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = file;
            self.bytes_written = 0;
        }
    }

    fn append(&mut self, line: &str) {
        if self.bytes_written.saturating_add(line.len() as u64) > self.max_bytes {
            self.truncate();
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.bytes_written = self.bytes_written.saturating_add(line.len() as u64);
        }
    }
}

fn writer() -> &'static Mutex<Option<RotatingFile>> {
    LOG_WRITER.get_or_init(|| Mutex::new(None))
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Whether `--logs` is active and not overridden by `--no-logs`.
pub fn logging_enabled(config: &AppConfig) -> bool {
    config.logs && !config.no_logs
}

/// Configure the debug log from CLI flags.
pub fn init_logging(config: &AppConfig) {
    let enabled = logging_enabled(config);
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(enabled && config.log_content, Ordering::Relaxed);

    let mut slot = writer()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = if enabled {
        RotatingFile::open(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}

/// Append a timestamped line to the debug log when logging is enabled.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", unix_seconds());
    let mut slot = writer()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(file) = slot.as_mut() {
        file.append(&line);
    }
}

/// Log a line that carries user content (transcripts, instructions).
pub fn log_debug_content(msg: &str) {
    if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        log_debug(msg);
    }
}

/// Record a panic location in the crash log. The payload is kept only when
/// content logging was enabled.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let payload = if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        info.payload()
            .downcast_ref::<&str>()
            .map(|text| (*text).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        "panic payload omitted (log-content disabled)".to_string()
    };
    let line = format!(
        "[{}] panic at {location}: {payload} (v{})\n",
        unix_seconds(),
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut crash) = RotatingFile::open(crash_log_path(), CRASH_LOG_MAX_BYTES) {
        crash.append(&line);
    }
}

#[cfg(test)]
pub(crate) fn set_logging_for_tests(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(enabled && content_enabled, Ordering::Relaxed);
    let mut slot = writer()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = if enabled {
        RotatingFile::open(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}
