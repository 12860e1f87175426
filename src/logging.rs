// Timestamped logging to stderr plus an optional session log file.
//
// Secrets must be masked before a message reaches `tlog!`; see
// `config::redact_command`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Open session log file. `None` means stderr-only logging.
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Write one already-formatted message to stderr and, when enabled, to the
/// session log file. Called by `tlog!`; not meant for direct use.
pub fn emit(message: std::fmt::Arguments<'_>) {
    let line = format!("{} {}", timestamp(), message);
    eprintln!("{}", line);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Start logging to a timestamped file under `reports_dir` and point the
/// stable `wisp-setup.log` name at it. Returns the new file's path.
pub fn init_file_logging(reports_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(reports_dir)
        .map_err(|e| format!("Failed to create reports dir: {}", e))?;

    let filename = format!(
        "{}-wisp-setup.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    );
    let log_path = reports_dir.join(&filename);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    refresh_stable_name(reports_dir, &filename);

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    emit(format_args!(
        "[logging] session log: {}",
        log_path.display()
    ));
    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    let closed = match LOG_FILE.lock() {
        Ok(mut guard) => guard.take().is_some(),
        Err(_) => false,
    };
    if closed {
        emit(format_args!("[logging] session log closed"));
    }
}

/// Keep `wisp-setup.log` pointing at the newest session log. Symlinks need
/// elevated privileges on Windows, so this is Unix-only.
fn refresh_stable_name(reports_dir: &Path, filename: &str) {
    #[cfg(unix)]
    {
        let stable = reports_dir.join("wisp-setup.log");
        let _ = std::fs::remove_file(&stable);
        if let Err(e) = std::os::unix::fs::symlink(filename, &stable) {
            eprintln!("{} [logging] wisp-setup.log symlink failed: {}", timestamp(), e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (reports_dir, filename);
    }
}

/// Timestamped logging macro: `HH:MM:SS.mmm` local time, stderr + session
/// log file.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {
        $crate::logging::emit(format_args!($($arg)*))
    };
}
