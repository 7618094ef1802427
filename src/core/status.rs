//! # Status Aggregator
//!
//! Collects short messages from anywhere (main context or workers) and, on
//! each refresh, combines them with live task state into one snapshot for
//! the status region.
//!
//! Messages are kept in a bounded history. What is *visible* is narrower:
//! the latest message, plus any error that has not been cleared and has fewer
//! than `error_retention` newer messages after it. Progress is never stored
//! here; `snapshot` reads it from the tasks every time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info, warn};

use crate::core::task::{TaskId, TaskStatus};
use crate::core::task_manager::TaskManager;
use crate::sheet::Sheet;

pub const DEFAULT_HISTORY: usize = 100;
pub const DEFAULT_ERROR_RETENTION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
    /// Insertion counter; higher is newer.
    pub tick: u64,
    pub posted_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedProgress {
    Determinate {
        completed: u64,
        total: u64,
        percent: u16,
    },
    /// Unknown total: `frame` advances every refresh so a spinner can move.
    Indeterminate { completed: u64, frame: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    pub paused: bool,
    pub elapsed: Duration,
    pub progress: RenderedProgress,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Most recent first.
    pub messages: Vec<StatusMessage>,
    /// Live tasks in creation order.
    pub tasks: Vec<TaskView>,
    pub paused_all: bool,
}

struct Inner {
    history: VecDeque<StatusMessage>,
    capacity: usize,
    error_retention: usize,
    next_tick: u64,
    /// Errors at or below this tick are hidden.
    cleared_through: u64,
    frame: u64,
}

#[derive(Clone)]
pub struct StatusAggregator {
    inner: Arc<Mutex<Inner>>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY, DEFAULT_ERROR_RETENTION)
    }
}

impl StatusAggregator {
    pub fn new(history: usize, error_retention: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::new(),
                capacity: history.max(1),
                error_retention,
                next_tick: 1,
                cleared_through: 0,
                frame: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn post(&self, text: impl Into<String>, severity: Severity) {
        let text = text.into();
        match severity {
            Severity::Error => warn!("status error: {}", text),
            Severity::Warning => info!("status warning: {}", text),
            Severity::Info => debug!("status: {}", text),
        }
        let mut inner = self.lock();
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.history.push_back(StatusMessage {
            text,
            severity,
            tick,
            posted_at: Local::now(),
        });
        while inner.history.len() > inner.capacity {
            inner.history.pop_front();
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.post(text, Severity::Info);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.post(text, Severity::Warning);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.post(text, Severity::Error);
    }

    /// Dismisses every error posted so far.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.cleared_through = inner.next_tick - 1;
    }

    /// The full bounded history, most recent first.
    pub fn history(&self) -> Vec<StatusMessage> {
        self.lock().history.iter().rev().cloned().collect()
    }

    /// Messages currently shown in the status region, most recent first.
    pub fn visible(&self) -> Vec<StatusMessage> {
        let inner = self.lock();
        let latest = inner.next_tick - 1;
        inner
            .history
            .iter()
            .rev()
            .filter(|m| {
                m.tick == latest
                    || (m.severity == Severity::Error
                        && m.tick > inner.cleared_through
                        && ((latest - m.tick) as usize) < inner.error_retention)
            })
            .cloned()
            .collect()
    }

    /// Reads live task state into a renderable snapshot. Tasks that reached a
    /// terminal state since the last refresh are reported once as a message
    /// and acknowledged.
    pub fn snapshot<S: Sheet>(&self, tasks: &TaskManager<S>) -> StatusSnapshot {
        let frame = {
            let mut inner = self.lock();
            inner.frame = inner.frame.wrapping_add(1);
            inner.frame
        };
        let paused_all = tasks.is_paused_all();

        let mut views = Vec::new();
        for task in tasks.all() {
            let status = task.status();
            if status.is_terminal() {
                match status {
                    TaskStatus::Failed => {
                        let reason = task
                            .error()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown error".to_string());
                        self.error(format!("{} failed: {}", task.label(), reason));
                    }
                    TaskStatus::Cancelled => self.info(format!("{} cancelled", task.label())),
                    _ => self.info(format!(
                        "{} done in {:.1}s",
                        task.label(),
                        task.elapsed().as_secs_f64()
                    )),
                }
                tasks.acknowledge(task.id());
                continue;
            }

            let progress = task.progress();
            let rendered = match progress.total {
                Some(total) => RenderedProgress::Determinate {
                    completed: progress.completed,
                    total,
                    percent: (progress.fraction().unwrap_or(0.0) * 100.0).round() as u16,
                },
                None => RenderedProgress::Indeterminate {
                    completed: progress.completed,
                    frame,
                },
            };
            views.push(TaskView {
                id: task.id(),
                label: task.label().to_string(),
                status,
                paused: paused_all || task.is_paused(),
                elapsed: task.elapsed(),
                progress: rendered,
            });
        }

        StatusSnapshot {
            messages: self.visible(),
            tasks: views,
            paused_all,
        }
    }
}
