use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Global log file path protected by Mutex
///
/// When None, log lines go to stdout.
pub static LOG_FILE: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Logs a message with timestamp to the configured output
///
/// # Arguments
/// * `message` - The message to log
///
/// # Returns
/// * `io::Result<()>` - Ok on success, Err if writing fails
///
/// # Example
/// ```text
/// // log("Received signal SIGTERM").unwrap();
/// ```
pub fn log(message: &str) -> io::Result<()> {
    log_with_worker(message, None)
}

/// Logs a message with timestamp and optional worker tag
///
/// Used by worker threads so interleaved lines can be told apart.
///
/// # Arguments
/// * `message` - The message to log
/// * `worker_id` - Optional worker identifier, rendered as `[W<n>]`
pub fn log_with_worker(message: &str, worker_id: Option<usize>) -> io::Result<()> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let line = match worker_id {
        Some(id) => format!("{} [W{}] {}\n", timestamp, id, message),
        None => format!("{} {}\n", timestamp, message),
    };

    // A poisoned lock only means another thread panicked mid-log; the path is still usable.
    let target = match LOG_FILE.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    match target {
        Some(path) => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(line.as_bytes())?;
            handle.flush()?;
        }
    }

    Ok(())
}

/// Sets the path for the log file
///
/// Subsequent calls to `log` append to this file.
pub fn set_log_file<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "log file path is not valid UTF-8")
    })?;
    match LOG_FILE.lock() {
        Ok(mut guard) => *guard = Some(path_str.to_string()),
        Err(poisoned) => *poisoned.into_inner() = Some(path_str.to_string()),
    }
    Ok(())
}

/// Routes log output back to stdout
pub fn clear_log_file() {
    match LOG_FILE.lock() {
        Ok(mut guard) => *guard = None,
        Err(poisoned) => *poisoned.into_inner() = None,
    }
}
