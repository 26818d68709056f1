//! The write → read → compare sweep.
//!
//! Every pass walks the planned range chunk by chunk. Within a chunk the
//! transfer size ramps geometrically from one sector up to the chunk size,
//! so the transport is exercised at every power-of-two length it will see.
//! Operational failures are tallied and reported, never fatal. Interruption
//! is polled only between transfers.

use crate::allocator::{DualBuffer, RunPlan};
use crate::interrupt::InterruptPoll;
use crate::pattern::{first_mismatch, PatternKind, PatternSource};
use crate::report::{
    ErrorDetail, ErrorRecord, MismatchWindow, Operation, ProgressUpdate, Reporter, RunStatus,
    RunSummary, SectorRange,
};
use crate::transport::{BlockTransport, Direction, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassLimit {
    /// Stop after this many full passes (at least one).
    Passes(u64),
    /// Keep going until interrupted.
    Unbounded,
}

impl PassLimit {
    fn has_more_after(self, pass: u64) -> bool {
        match self {
            PassLimit::Passes(n) => pass < n.max(1),
            PassLimit::Unbounded => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub pass_limit: PassLimit,
    pub pattern: PatternKind,
}

impl EngineConfig {
    /// One pass with the fixed fill/sentinel pair.
    pub fn single_pass() -> Self {
        Self {
            pass_limit: PassLimit::Passes(1),
            pattern: PatternKind::default(),
        }
    }

    /// Unbounded passes, fresh random fill byte every ramp step.
    pub fn continuous(seed: Option<u64>) -> Self {
        Self {
            pass_limit: PassLimit::Unbounded,
            pattern: PatternKind::Random { seed },
        }
    }

    pub fn with_passes(self, passes: u64) -> Self {
        Self {
            pass_limit: PassLimit::Passes(passes),
            ..self
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::single_pass()
    }
}

/// Mutable state of one run, threaded through every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    pub pass_number: u64,
    pub error_count: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub mismatches: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub bytes_compared: u64,
    pub current_sector: u64,
    pub current_chunk_size: u64,
    pub status: RunStatus,
}

impl RunState {
    fn new() -> Self {
        Self {
            pass_number: 1,
            error_count: 0,
            write_errors: 0,
            read_errors: 0,
            mismatches: 0,
            bytes_written: 0,
            bytes_read: 0,
            bytes_compared: 0,
            current_sector: 0,
            current_chunk_size: 0,
            status: RunStatus::Running,
        }
    }

    fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            pass: self.pass_number,
            error_count: self.error_count,
            write_errors: self.write_errors,
            read_errors: self.read_errors,
            mismatches: self.mismatches,
            bytes_written: self.bytes_written,
            bytes_read: self.bytes_read,
            bytes_compared: self.bytes_compared,
        }
    }
}

pub struct VerificationEngine<T, I> {
    plan: RunPlan,
    buffer: DualBuffer,
    transport: T,
    interrupt: I,
    patterns: PatternSource,
    pass_limit: PassLimit,
}

impl<T: BlockTransport, I: InterruptPoll> VerificationEngine<T, I> {
    pub fn new(
        plan: RunPlan,
        buffer: DualBuffer,
        transport: T,
        interrupt: I,
        config: EngineConfig,
    ) -> Self {
        Self {
            plan,
            buffer,
            transport,
            interrupt,
            patterns: PatternSource::new(config.pattern),
            pass_limit: config.pass_limit,
        }
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run passes until the pass limit is reached or an interruption is
    /// observed. The summary is also handed to `reporter.finished`.
    pub fn run(&mut self, reporter: &mut dyn Reporter) -> RunSummary {
        let mut state = RunState::new();
        loop {
            self.run_pass(&mut state, reporter);
            if !state.is_running() {
                break;
            }
            if !self.pass_limit.has_more_after(state.pass_number) {
                state.status = RunStatus::Completed;
                break;
            }
            state.pass_number += 1;
        }
        let summary = state.summary();
        reporter.finished(&summary);
        summary
    }

    fn run_pass(&mut self, state: &mut RunState, reporter: &mut dyn Reporter) {
        let plan = self.plan;
        for chunk_start in plan.chunk_starts() {
            state.current_sector = chunk_start;
            for nsec in plan.ramp() {
                state.current_chunk_size = nsec;
                self.ramp_step(state, reporter);
                if !state.is_running() {
                    return;
                }
            }
        }
    }

    /// Poll for an interruption. Returns `false` once the run must stop.
    fn checkpoint(&mut self, state: &mut RunState) -> bool {
        if self.interrupt.poll_interrupt() {
            self.interrupt.consume_interrupt_input();
            state.status = RunStatus::Interrupted;
            return false;
        }
        true
    }

    fn ramp_step(&mut self, state: &mut RunState, reporter: &mut dyn Reporter) {
        let pass = state.pass_number;
        let nsec = state.current_chunk_size;
        let range = SectorRange {
            start: state.current_sector,
            end: state.current_sector + nsec,
        };
        let bytes = nsec * u64::from(self.plan.sector_size);
        let len = bytes as usize;
        let progress = |operation| ProgressUpdate {
            pass,
            operation,
            range,
            chunk_sectors: nsec,
            byte_count: bytes,
        };

        if !self.checkpoint(state) {
            return;
        }

        let pattern = self.patterns.next_step();
        let (write_buf, read_buf) = self.buffer.split();
        pattern.apply(&mut write_buf[..len], &mut read_buf[..len]);

        reporter.progress(&progress(Operation::Write));
        let (write_buf, _) = self.buffer.split();
        let written = self
            .transport
            .transfer(Direction::Write, &mut write_buf[..len], nsec, range.start);
        let write_ok = Self::settle(state, reporter, Operation::Write, range, written);
        if write_ok {
            state.bytes_written += bytes;
        }

        if !self.checkpoint(state) {
            return;
        }

        reporter.progress(&progress(Operation::Read));
        let (_, read_buf) = self.buffer.split();
        let read = self
            .transport
            .transfer(Direction::Read, &mut read_buf[..len], nsec, range.start);
        let read_ok = Self::settle(state, reporter, Operation::Read, range, read);
        if read_ok {
            state.bytes_read += bytes;
        }

        if !self.checkpoint(state) {
            return;
        }

        reporter.progress(&progress(Operation::Compare));
        // data that was never validly transferred is not compared
        if !(write_ok && read_ok) {
            return;
        }
        let (write_buf, read_buf) = self.buffer.split();
        let (expected, actual) = (&write_buf[..len], &read_buf[..len]);
        state.bytes_compared += bytes;
        if let Some(first) = first_mismatch(expected, actual) {
            state.mismatches += 1;
            state.error_count += 1;
            reporter.error(&ErrorRecord {
                pass: state.pass_number,
                operation: Operation::Compare,
                range,
                detail: ErrorDetail::Mismatch {
                    first,
                    window: MismatchWindow::around(first.offset, expected, actual),
                },
            });
        }
    }

    /// Fold a transfer result into the tally. Returns whether it succeeded.
    fn settle(
        state: &mut RunState,
        reporter: &mut dyn Reporter,
        operation: Operation,
        range: SectorRange,
        result: Result<(), TransportError>,
    ) -> bool {
        let Err(e) = result else {
            return true;
        };
        match operation {
            Operation::Write => state.write_errors += 1,
            _ => state.read_errors += 1,
        }
        state.error_count += 1;
        reporter.error(&ErrorRecord {
            pass: state.pass_number,
            operation,
            range,
            detail: ErrorDetail::Transport(e),
        });
        false
    }
}
