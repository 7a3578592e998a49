use crate::paths::AppPaths;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Appends `[timestamp] LEVEL: message` to the app log. Logging never fails
/// the caller; write errors are dropped so a full disk cannot cascade into
/// job failures.
pub fn log_event(paths: &AppPaths, level: LogLevel, message: &str) {
    let path = paths.app_log_path();
    let _ = rotate_if_oversized(&path, MAX_LOG_BYTES);
    let _ = append_line(&path, level, message);
}

pub fn log_info(paths: &AppPaths, message: &str) {
    log_event(paths, LogLevel::Info, message);
}

pub fn log_warning(paths: &AppPaths, message: &str) {
    log_event(paths, LogLevel::Warning, message);
}

pub fn log_error(paths: &AppPaths, message: &str) {
    log_event(paths, LogLevel::Error, message);
}

fn append_line(path: &Path, level: LogLevel, message: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "[{timestamp}] {}: {message}", level.as_str())?;
    Ok(())
}

/// Keeps the newer half of the log once it grows past `max_bytes`.
fn rotate_if_oversized(path: &Path, max_bytes: u64) -> std::io::Result<()> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Ok(());
    };
    if meta.len() <= max_bytes {
        return Ok(());
    }

    let contents = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let keep_from = lines.len() / 2;
    let mut rotated = lines[keep_from..].join("\n");
    if !rotated.is_empty() {
        rotated.push('\n');
    }
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    rotated.push_str(&format!("[{timestamp}] LOG_CLEANUP: Log file rotated\n"));
    std::fs::write(path, rotated)?;
    Ok(())
}
