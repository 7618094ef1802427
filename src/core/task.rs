//! # Tasks
//!
//! One `Task` per asynchronous command invocation. The worker running the
//! body owns status and progress updates; the task manager owns the control
//! flags (cancel, pause). Both sides only go through the methods here, so
//! every update is observable from any thread.
//!
//! ```text
//! Pending ──▶ Running ──▶ Done
//!    │           ├──────▶ Failed
//!    └───────────┴──────▶ Cancelled
//! ```
//!
//! Terminal states are absorbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::warn;

use crate::core::command::CommandError;
use crate::core::prompt::CancelFlag;
use crate::core::session::TaskOutcome;
use crate::sheet::{Sheet, SheetId};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Cancelled,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Done | TaskStatus::Failed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    fn can_advance_to(self, next: TaskStatus) -> bool {
        match self {
            // A task that never started can still be cancelled or fail to start.
            TaskStatus::Pending => matches!(
                next,
                TaskStatus::Running | TaskStatus::Cancelled | TaskStatus::Failed
            ),
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Completed units out of an optional total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed.min(total)) as f64 / total as f64),
            None => None,
        }
    }
}

struct TaskState {
    status: TaskStatus,
    progress: Progress,
    error: Option<CommandError>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

pub struct Task<S: Sheet> {
    id: TaskId,
    label: String,
    command: String,
    sheet: Weak<S>,
    sheet_id: SheetId,
    created_at: DateTime<Local>,
    state: Mutex<TaskState>,
    cancel_requested: CancelFlag,
    paused: AtomicBool,
    detached: AtomicBool,
}

impl<S: Sheet> Task<S> {
    pub(crate) fn new(id: TaskId, command: &str, sheet: &Arc<S>) -> Self {
        Self {
            id,
            label: format!("{} {}", command, sheet.name()),
            command: command.to_string(),
            sheet: Arc::downgrade(sheet),
            sheet_id: sheet.id(),
            created_at: Local::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                progress: Progress::default(),
                error: None,
                started_at: None,
                finished_at: None,
            }),
            cancel_requested: CancelFlag::default(),
            paused: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn sheet_id(&self) -> SheetId {
        self.sheet_id
    }

    /// The owning sheet, if it is still alive.
    pub fn sheet(&self) -> Option<Arc<S>> {
        self.sheet.upgrade()
    }

    pub(crate) fn sheet_ref(&self) -> Weak<S> {
        Weak::clone(&self.sheet)
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress
    }

    pub fn error(&self) -> Option<CommandError> {
        self.lock().error.clone()
    }

    /// Time spent running so far, or in total once finished.
    pub fn elapsed(&self) -> Duration {
        let state = self.lock();
        match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.is_raised()
    }

    /// Shared with prompts the task waits on.
    pub(crate) fn cancel_flag(&self) -> CancelFlag {
        self.cancel_requested.clone()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Moves the status forward. Returns false (and leaves the task alone)
    /// for any transition that is not allowed.
    pub(crate) fn advance(&self, next: TaskStatus) -> bool {
        let mut state = self.lock();
        if !state.status.can_advance_to(next) {
            warn!(
                "Task {} rejected transition {} -> {}",
                self.id,
                state.status.label(),
                next.label()
            );
            return false;
        }
        state.status = next;
        match next {
            TaskStatus::Running => state.started_at = Some(Instant::now()),
            s if s.is_terminal() => state.finished_at = Some(Instant::now()),
            _ => {}
        }
        true
    }

    /// Records the body's result as the terminal state.
    pub(crate) fn finish(&self, result: Result<(), CommandError>) -> TaskStatus {
        let next = match &result {
            Ok(()) => TaskStatus::Done,
            Err(CommandError::Cancelled) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        if self.advance(next)
            && let Err(e) = result
            && next == TaskStatus::Failed
        {
            self.lock().error = Some(e);
        }
        self.status()
    }

    /// Progress is frozen while paused and after the task has finished.
    pub(crate) fn set_progress(&self, progress: Progress) {
        if self.is_paused() {
            return;
        }
        let mut state = self.lock();
        if state.status == TaskStatus::Running {
            state.progress = progress;
        }
    }

    /// Returns true only for the first request on a live task.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel_requested.raise()
    }

    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.paused.swap(paused, Ordering::SeqCst) != paused
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

impl<S: Sheet> TaskOutcome for Task<S> {
    fn ended_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled || self.is_detached()
    }
}
