//! Events the engine emits and the console renderer for them.

use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::logging::{self, LogFile, DUMP_LEN};
use crate::pattern::Mismatch;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write,
    Read,
    Compare,
}

impl Operation {
    fn progress_label(self) -> &'static str {
        match self {
            Operation::Write => "Writing",
            Operation::Read => "Reading",
            Operation::Compare => "Checking",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Compare => "compare",
        })
    }
}

/// Half-open sector range `[start, end[`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub start: u64,
    pub end: u64,
}

impl SectorRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

impl fmt::Display for SectorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}[", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub pass: u64,
    pub operation: Operation,
    pub range: SectorRange,
    pub chunk_sectors: u64,
    pub byte_count: u64,
}

/// Bytes around the first mismatch, copied out of the buffers so the
/// record outlives the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MismatchWindow {
    pub base: usize,
    pub len: usize,
    pub expected: [u8; DUMP_LEN],
    pub actual: [u8; DUMP_LEN],
}

impl MismatchWindow {
    pub fn around(offset: usize, expected: &[u8], actual: &[u8]) -> Self {
        let base = offset - offset % DUMP_LEN;
        let len = DUMP_LEN.min(expected.len().min(actual.len()) - base);
        let mut w = Self {
            base,
            len,
            expected: [0; DUMP_LEN],
            actual: [0; DUMP_LEN],
        };
        w.expected[..len].copy_from_slice(&expected[base..base + len]);
        w.actual[..len].copy_from_slice(&actual[base..base + len]);
        w
    }

    pub fn dump(&self) -> String {
        logging::hex_dump(self.base, &self.expected[..self.len], &self.actual[..self.len])
    }
}

#[derive(Debug)]
pub enum ErrorDetail {
    Transport(TransportError),
    Mismatch {
        first: Mismatch,
        window: MismatchWindow,
    },
}

#[derive(Debug)]
pub struct ErrorRecord {
    pub pass: u64,
    pub operation: Operation,
    pub range: SectorRange,
    pub detail: ErrorDetail,
}

impl ErrorRecord {
    pub fn describe(&self) -> String {
        match &self.detail {
            ErrorDetail::Transport(e) => format!("sectors {}: {}", self.range, e),
            ErrorDetail::Mismatch { first, .. } => format!(
                "read buffer does not match write buffer, sectors {}: [{}] {:02x} != {:02x}",
                self.range, first.offset, first.expected, first.actual
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Interrupted,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Running => "running",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Completed => "completed",
        })
    }
}

/// Final tally of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub pass: u64,
    pub error_count: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub mismatches: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub bytes_compared: u64,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "status": self.status.to_string(),
            "pass": self.pass,
            "error_count": self.error_count,
            "write_errors": self.write_errors,
            "read_errors": self.read_errors,
            "mismatches": self.mismatches,
            "bytes_written": self.bytes_written,
            "bytes_read": self.bytes_read,
            "bytes_compared": self.bytes_compared,
        })
    }

    pub fn headline(&self) -> String {
        match self.status {
            RunStatus::Interrupted => format!(
                "Test interrupted during pass {}. {} errors detected.",
                self.pass, self.error_count
            ),
            _ => format!("Test end. {} errors detected.", self.error_count),
        }
    }
}

pub trait Reporter {
    fn progress(&mut self, update: &ProgressUpdate);
    fn error(&mut self, record: &ErrorRecord);
    fn finished(&mut self, summary: &RunSummary);
}

/// Single overwritten status line plus timestamped log lines.
pub struct ConsoleReporter {
    pb: ProgressBar,
    log_f: LogFile,
}

impl ConsoleReporter {
    pub fn new(log_f: LogFile) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {spinner} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { pb, log_f }
    }
}

impl Reporter for ConsoleReporter {
    fn progress(&mut self, u: &ProgressUpdate) {
        self.pb.set_message(format!(
            "Pass {} {} {}B {} sectors {}",
            u.pass,
            u.operation.progress_label(),
            u.byte_count,
            u.range.len(),
            u.range
        ));
        self.pb.tick();
    }

    fn error(&mut self, record: &ErrorRecord) {
        let category = match record.operation {
            Operation::Write => "Write error",
            Operation::Read => "Read error",
            Operation::Compare => "Data mismatch",
        };
        let dump = match &record.detail {
            ErrorDetail::Mismatch { window, .. } => Some(window.dump()),
            ErrorDetail::Transport(_) => None,
        };
        logging::log_error(
            &self.log_f,
            Some(&self.pb),
            record.pass,
            category,
            &record.describe(),
            dump,
        );
    }

    fn finished(&mut self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        logging::log_simple(&self.log_f, None, summary.headline());
        logging::log_simple(
            &self.log_f,
            None,
            format!(
                "  Write errors: {}  Read errors: {}  Mismatches: {}",
                summary.write_errors, summary.read_errors, summary.mismatches
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_range_display() {
        let r = SectorRange { start: 2, end: 6 };
        assert_eq!(r.to_string(), "[2,6[");
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn window_is_aligned_and_clipped() {
        let expected = vec![0xAEu8; 40];
        let mut actual = expected.clone();
        actual[37] = 0xAF;
        let w = MismatchWindow::around(37, &expected, &actual);
        assert_eq!(w.base, 32);
        assert_eq!(w.len, 8);
        assert_eq!(w.actual[5], 0xAF);
    }

    #[test]
    fn mismatch_description() {
        let expected = [0xAEu8; 4];
        let actual = [0xAE, 0xAE, 0x2E, 0xAE];
        let rec = ErrorRecord {
            pass: 1,
            operation: Operation::Compare,
            range: SectorRange { start: 2, end: 3 },
            detail: ErrorDetail::Mismatch {
                first: Mismatch { offset: 2, expected: 0xAE, actual: 0x2E },
                window: MismatchWindow::around(2, &expected, &actual),
            },
        };
        assert_eq!(
            rec.describe(),
            "read buffer does not match write buffer, sectors [2,3[: [2] ae != 2e"
        );
    }

    #[test]
    fn summary_json_and_headline() {
        let s = RunSummary {
            status: RunStatus::Interrupted,
            pass: 4,
            error_count: 2,
            write_errors: 1,
            read_errors: 0,
            mismatches: 1,
            bytes_written: 1024,
            bytes_read: 512,
            bytes_compared: 512,
        };
        let v = s.to_json();
        assert_eq!(v["status"], "interrupted");
        assert_eq!(v["error_count"], 2);
        assert_eq!(s.headline(), "Test interrupted during pass 4. 2 errors detected.");
    }
}
