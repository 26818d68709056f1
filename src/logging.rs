use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use indicatif::ProgressBar;
use parking_lot::Mutex;

pub const DEFAULT_LOG_FILE: &str = "dma_test.log";

pub type LogFile = Option<Arc<Mutex<File>>>;

/// Open the append-only run log. Failure is reported and the run goes on
/// with stderr only.
pub fn open_log_file<P: AsRef<Path>>(path: P) -> LogFile {
    let path = path.as_ref();
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(Arc::new(Mutex::new(f))),
        Err(e) => {
            eprintln!(
                "[{}] Failed to open log file '{}': {}. Further logs will only go to stderr.",
                current_timestamp(),
                path.display(),
                e
            );
            None
        }
    }
}

pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn log_message_internal(log_f: &LogFile, pb: Option<&ProgressBar>, full_message: String) {
    match pb {
        Some(pb) if !pb.is_hidden() => pb.println(full_message.as_str()),
        _ => eprintln!("{}", full_message),
    }
    if let Some(lf_arc) = log_f {
        let mut lf_guard = lf_arc.lock();
        let _ = writeln!(*lf_guard, "{}", full_message);
        let _ = lf_guard.flush();
    }
}

pub fn log_simple<S: AsRef<str>>(log_f: &LogFile, pb: Option<&ProgressBar>, msg: S) {
    let msg_with_ts = format!("[{}] {}", current_timestamp(), msg.as_ref());
    log_message_internal(log_f, pb, msg_with_ts);
}

/// Bytes shown on each side of a mismatch dump.
pub const DUMP_LEN: usize = 16;

/// Hex lines for `expected` and `actual`, starting at `base` (the buffer
/// offset of the first byte shown).
pub fn hex_dump(base: usize, expected: &[u8], actual: &[u8]) -> String {
    format!(
        "Expected @{base:#06x}: {:02X?}\nActual   @{base:#06x}: {:02X?}",
        expected, actual
    )
}

pub fn log_error(
    log_f: &LogFile,
    pb: Option<&ProgressBar>,
    pass: u64,
    category: &str,
    err_desc: &str,
    dump: Option<String>,
) {
    let mut error_message = format!(
        "[{}] [PASS {}] {}: {}",
        current_timestamp(),
        pass,
        category,
        err_desc
    );
    if let Some(d) = dump {
        error_message.push('\n');
        error_message.push_str(&d);
    }
    log_message_internal(log_f, pb, error_message);
}
