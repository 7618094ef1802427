//! # Replay Engine
//!
//! Resubmits a recorded log to a dispatcher in order, feeding each entry's
//! recorded answers to its prompts instead of live input. An entry whose
//! prompt was dismissed gets the same dismissal after its answers, and an
//! entry whose task was cancelled is spawned already cancelled.
//!
//! Before every entry (and once more after the last) the engine passes a
//! synchronization barrier:
//!
//! ```text
//! previous entry's sheet settled ──▶ previous task inspected
//!   ──▶ delay elapsed ──▶ target sheet settled ──▶ submit entry i
//! ```
//!
//! Waiting for every task of the affected sheets makes the outcome
//! independent of how the original session's tasks happened to interleave.
//!
//! `run` drives the whole log, blocking at each barrier. `poll` does one
//! step without blocking and reports `Waiting` while a barrier is closed, so
//! an interactive loop can keep drawing progress in between.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::core::command::CommandError;
use crate::core::dispatch::{DispatchOutcome, Dispatcher, Invocation};
use crate::core::prompt::{PromptError, ScriptedPrompter};
use crate::core::session::ReplayLog;
use crate::core::task::{Task, TaskStatus};
use crate::sheet::{Sheet, SheetId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesyncReason {
    /// The command asked more questions than were recorded.
    AnswersExhausted { recorded: usize },
    UnknownCommand,
    SheetMismatch { expected: String, found: String },
    NoActiveSheet,
}

impl fmt::Display for DesyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesyncReason::AnswersExhausted { recorded } => {
                write!(f, "needs more than the {recorded} recorded answers")
            }
            DesyncReason::UnknownCommand => write!(f, "command no longer resolves"),
            DesyncReason::SheetMismatch { expected, found } => {
                write!(f, "expected sheet '{expected}', found '{found}'")
            }
            DesyncReason::NoActiveSheet => write!(f, "no active sheet"),
        }
    }
}

#[derive(Debug)]
pub enum ReplayError {
    Io(io::Error),
    Parse(String),
    UnsupportedVersion(u32),
    Desync {
        /// Zero-based index of the entry that failed.
        entry: usize,
        command: String,
        reason: DesyncReason,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "cannot read replay log: {e}"),
            ReplayError::Parse(e) => write!(f, "malformed replay log: {e}"),
            ReplayError::UnsupportedVersion(v) => write!(f, "unsupported replay log version {v}"),
            ReplayError::Desync {
                entry,
                command,
                reason,
            } => write!(f, "replay desync at entry {} ({}): {}", entry + 1, command, reason),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayProgress {
    /// Entry at this index was submitted.
    Submitted(usize),
    /// A barrier or the delay is not clear yet.
    Waiting,
    Finished,
}

/// The task spawned by the last submitted entry, checked once it settles.
struct Inflight<S: Sheet> {
    entry: usize,
    task: Arc<Task<S>>,
    prompter: Arc<ScriptedPrompter>,
}

pub struct ReplayEngine<S: Sheet> {
    log: ReplayLog,
    delay: Duration,
    next: usize,
    last_submit: Option<Instant>,
    previous_sheet: Option<SheetId>,
    inflight: Option<Inflight<S>>,
    finished: bool,
}

impl<S: Sheet> ReplayEngine<S> {
    pub fn new(log: ReplayLog, delay: Duration) -> Self {
        Self {
            log,
            delay,
            next: 0,
            last_submit: None,
            previous_sheet: None,
            inflight: None,
            finished: false,
        }
    }

    pub fn load(path: &Path, delay: Duration) -> Result<Self, ReplayError> {
        Ok(Self::new(ReplayLog::load(path)?, delay))
    }

    /// Index of the next entry to submit.
    pub fn position(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.log.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.entries.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops the replay where it is; nothing more will be submitted.
    pub fn abort(&mut self) {
        if !self.finished {
            warn!("Replay aborted at entry {}", self.next + 1);
            self.finished = true;
        }
    }

    /// Replays every remaining entry, blocking at each barrier. Returns the
    /// number of entries submitted.
    pub fn run(&mut self, dispatcher: &Dispatcher<S>) -> Result<usize, ReplayError> {
        let mut submitted = 0;
        loop {
            match self.step(dispatcher, true)? {
                ReplayProgress::Submitted(_) => submitted += 1,
                ReplayProgress::Waiting => {}
                ReplayProgress::Finished => return Ok(submitted),
            }
        }
    }

    /// One non-blocking step.
    pub fn poll(&mut self, dispatcher: &Dispatcher<S>) -> Result<ReplayProgress, ReplayError> {
        self.step(dispatcher, false)
    }

    fn desync(&mut self, entry: usize, reason: DesyncReason) -> ReplayError {
        self.finished = true;
        self.inflight = None;
        let command = self
            .log
            .entries
            .get(entry)
            .map(|e| e.command.clone())
            .unwrap_or_default();
        let err = ReplayError::Desync {
            entry,
            command,
            reason,
        };
        error!("{}", err);
        err
    }

    /// Waits (or checks, when not blocking) for every task of `sheet`.
    fn barrier(dispatcher: &Dispatcher<S>, sheet: SheetId, block: bool) -> bool {
        let tasks = &dispatcher.env().tasks;
        if block {
            tasks.join_all(sheet);
            true
        } else {
            tasks.all_settled(sheet)
        }
    }

    fn check_inflight(&mut self) -> Result<(), ReplayError> {
        let Some(inflight) = self.inflight.take() else {
            return Ok(());
        };
        let status = inflight.task.status();
        if status == TaskStatus::Failed
            && let Some(CommandError::Prompt(PromptError::Exhausted { recorded })) = inflight.task.error()
        {
            return Err(self.desync(inflight.entry, DesyncReason::AnswersExhausted { recorded }));
        }
        if !status.is_terminal() {
            // Detached or still running on a sheet that was closed meanwhile.
            warn!(
                "Replay entry {} task {} left unsettled ({})",
                inflight.entry + 1,
                inflight.task.id(),
                status.label()
            );
        }
        if status != TaskStatus::Cancelled && inflight.prompter.remaining() > 0 {
            warn!(
                "Replay entry {} left {} recorded answers unused",
                inflight.entry + 1,
                inflight.prompter.remaining()
            );
        }
        Ok(())
    }

    fn step(&mut self, dispatcher: &Dispatcher<S>, block: bool) -> Result<ReplayProgress, ReplayError> {
        if self.finished {
            return Ok(ReplayProgress::Finished);
        }

        if let Some(previous) = self.previous_sheet
            && !Self::barrier(dispatcher, previous, block)
        {
            return Ok(ReplayProgress::Waiting);
        }
        self.check_inflight()?;

        let index = self.next;
        if index >= self.log.entries.len() {
            self.finished = true;
            info!("Replay finished after {} entries", index);
            return Ok(ReplayProgress::Finished);
        }

        if let Some(last) = self.last_submit {
            let due = last + self.delay;
            let now = Instant::now();
            if now < due {
                if !block {
                    return Ok(ReplayProgress::Waiting);
                }
                thread::sleep(due - now);
            }
        }

        let Some(sheet) = dispatcher.env().workspace.top() else {
            return Err(self.desync(index, DesyncReason::NoActiveSheet));
        };
        if !Self::barrier(dispatcher, sheet.id(), block) {
            return Ok(ReplayProgress::Waiting);
        }

        let entry = self.log.entries[index].clone();
        if sheet.name() != entry.sheet {
            let reason = DesyncReason::SheetMismatch {
                expected: entry.sheet.clone(),
                found: sheet.name(),
            };
            return Err(self.desync(index, reason));
        }
        let Some(command) = dispatcher
            .env()
            .registry
            .command(&entry.command, sheet.sheet_type(), sheet.id())
        else {
            return Err(self.desync(index, DesyncReason::UnknownCommand));
        };

        info!(
            "Replay entry {}/{}: {} on '{}'",
            index + 1,
            self.log.entries.len(),
            entry.command,
            entry.sheet
        );
        let prompter =
            Arc::new(ScriptedPrompter::new(entry.answers.clone()).then_abort(entry.aborted));
        let mut invocation = Invocation::new(command, Arc::clone(&sheet))
            .args(entry.args.clone())
            .mode(entry.mode.clone())
            .background(entry.background)
            .cancelled(entry.cancelled)
            .prompter(prompter.clone());
        if let Some(key) = entry.key.clone() {
            invocation = invocation.key(key);
        }

        match dispatcher.dispatch(invocation) {
            DispatchOutcome::Failed(e) if e.is_answers_exhausted() => {
                let recorded = entry.answers.len();
                return Err(self.desync(index, DesyncReason::AnswersExhausted { recorded }));
            }
            DispatchOutcome::Spawned(task) => {
                self.inflight = Some(Inflight {
                    entry: index,
                    task,
                    prompter,
                });
            }
            DispatchOutcome::Completed(effects) => {
                if !effects.is_empty() {
                    info!("Replay ignores effects {:?} of entry {}", effects, index + 1);
                }
            }
            DispatchOutcome::Failed(_) => {}
        }

        self.previous_sheet = Some(sheet.id());
        self.next += 1;
        self.last_submit = Some(Instant::now());
        Ok(ReplayProgress::Submitted(index))
    }
}
