//! # Task Manager
//!
//! Runs asynchronous command bodies on tokio's blocking pool, one worker per
//! task. Bodies are ordinary blocking code (sorting, reading files), so they
//! go through `spawn_blocking` rather than onto the async executor.
//!
//! ```text
//! spawn ──▶ registry (BTreeMap, id order = creation order)
//!   │
//!   └──▶ spawn_blocking ──▶ run_task ──▶ body(ctx, args)
//!                               │
//!                               └──▶ finish ──▶ settled.notify_all
//! ```
//!
//! ## Cancellation and pausing
//!
//! Both are cooperative. `cancel` raises a flag and `pause` closes a gate;
//! the body only notices at `ctx.checkpoint()`. A body that never polls keeps
//! running until it returns on its own. `join_all` waits for it indefinitely;
//! `teardown` gives it a grace period and then detaches it: the task leaves
//! the registry and whatever it eventually produces is discarded.
//!
//! A task holds its sheet weakly for its whole life, so closing a sheet is
//! never delayed by a task keeping it alive.
//!
//! Task metadata is safe to observe from any thread. Sheet row data is not
//! protected here; bodies that must not overlap on one sheet serialize
//! themselves.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::runtime::Handle;

use crate::core::action::Action;
use crate::core::command::{Command, CommandContext, CommandEnv, CommandError, panic_message};
use crate::core::prompt::{CancelFlag, Prompter};
use crate::core::task::{Progress, Task, TaskId, TaskStatus};
use crate::sheet::{Sheet, SheetId};

pub const DEFAULT_ABANDON_AFTER: Duration = Duration::from_secs(5);

struct Shared<S: Sheet> {
    registry: Mutex<BTreeMap<TaskId, Arc<Task<S>>>>,
    /// Signalled whenever a task reaches a terminal state.
    settled: Condvar,
    gate: Mutex<()>,
    /// Signalled whenever a pause or cancel flag changes.
    gate_changed: Condvar,
    paused_all: AtomicBool,
    notify: Mutex<Option<Sender<Action>>>,
}

impl<S: Sheet> Shared<S> {
    fn registry(&self) -> MutexGuard<'_, BTreeMap<TaskId, Arc<Task<S>>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes a pause/cancel flag under the gate lock so no waiter misses it.
    fn with_gate<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f();
        self.gate_changed.notify_all();
        result
    }

    fn settle(&self, task: &Task<S>) {
        {
            let _registry = self.registry();
            self.settled.notify_all();
        }
        if let Some(tx) = self
            .notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(Action::TaskSettled(task.id()));
        }
    }
}

pub struct TaskManager<S: Sheet> {
    runtime: Handle,
    shared: Arc<Shared<S>>,
    next_id: AtomicU64,
    abandon_after: Duration,
}

impl<S: Sheet> TaskManager<S> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            shared: Arc::new(Shared {
                registry: Mutex::new(BTreeMap::new()),
                settled: Condvar::new(),
                gate: Mutex::new(()),
                gate_changed: Condvar::new(),
                paused_all: AtomicBool::new(false),
                notify: Mutex::new(None),
            }),
            next_id: AtomicU64::new(1),
            abandon_after: DEFAULT_ABANDON_AFTER,
        }
    }

    /// Grace period `teardown` gives non-cooperating tasks.
    pub fn with_abandon_after(mut self, grace: Duration) -> Self {
        self.abandon_after = grace;
        self
    }

    /// Sends `Action::TaskSettled` to the main loop when tasks finish.
    pub fn set_notifier(&self, tx: Sender<Action>) {
        *self
            .shared
            .notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    /// Starts `command` on its own worker and returns immediately.
    pub fn spawn(
        &self,
        command: Command<S>,
        sheet: &Arc<S>,
        args: Vec<String>,
        env: CommandEnv<S>,
        prompter: Arc<dyn Prompter>,
    ) -> Arc<Task<S>> {
        self.start(command, sheet, args, env, prompter, false)
    }

    /// Registers a task whose cancellation is requested before its worker
    /// starts, so the body never runs. Replay uses this for tasks that were
    /// cancelled while recording.
    pub fn spawn_cancelled(
        &self,
        command: Command<S>,
        sheet: &Arc<S>,
        args: Vec<String>,
        env: CommandEnv<S>,
        prompter: Arc<dyn Prompter>,
    ) -> Arc<Task<S>> {
        self.start(command, sheet, args, env, prompter, true)
    }

    fn start(
        &self,
        command: Command<S>,
        sheet: &Arc<S>,
        args: Vec<String>,
        env: CommandEnv<S>,
        prompter: Arc<dyn Prompter>,
        cancelled: bool,
    ) -> Arc<Task<S>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(Task::new(id, &command.name, sheet));
        if cancelled {
            task.request_cancel();
        }
        self.shared.registry().insert(id, Arc::clone(&task));
        info!(
            "Spawning task {} ({}){}",
            id,
            task.label(),
            if cancelled { " already cancelled" } else { "" }
        );

        let shared = Arc::clone(&self.shared);
        let worker_task = Arc::clone(&task);
        self.runtime.spawn_blocking(move || {
            run_task(shared, worker_task, command, args, env, prompter);
        });
        task
    }

    pub fn get(&self, id: TaskId) -> Option<Arc<Task<S>>> {
        self.shared.registry().get(&id).cloned()
    }

    /// Tasks owned by `sheet`, in creation order.
    pub fn list(&self, sheet: SheetId) -> Vec<Arc<Task<S>>> {
        self.shared
            .registry()
            .values()
            .filter(|t| t.sheet_id() == sheet)
            .cloned()
            .collect()
    }

    /// Every registered task, in creation order.
    pub fn all(&self) -> Vec<Arc<Task<S>>> {
        self.shared.registry().values().cloned().collect()
    }

    /// The most recently created task of `sheet` that has not finished.
    pub fn newest_live(&self, sheet: SheetId) -> Option<Arc<Task<S>>> {
        self.shared
            .registry()
            .values()
            .rev()
            .find(|t| t.sheet_id() == sheet && !t.status().is_terminal())
            .cloned()
    }

    /// Requests cancellation. Returns false if the task is unknown, already
    /// finished, or already has a request outstanding.
    pub fn cancel(&self, id: TaskId) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };
        let requested = self.shared.with_gate(|| task.request_cancel());
        if requested {
            info!("Cancel requested for task {} ({})", id, task.label());
        }
        requested
    }

    pub fn pause(&self, id: TaskId) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };
        let changed = self.shared.with_gate(|| task.set_paused(true));
        if changed {
            info!("Paused task {}", id);
        }
        changed
    }

    pub fn resume(&self, id: TaskId) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };
        let changed = self.shared.with_gate(|| task.set_paused(false));
        if changed {
            info!("Resumed task {}", id);
        }
        changed
    }

    /// Holds every task at its next checkpoint.
    pub fn pause_all(&self) {
        self.shared
            .with_gate(|| self.shared.paused_all.store(true, Ordering::SeqCst));
        info!("Paused all tasks");
    }

    pub fn resume_all(&self) {
        self.shared
            .with_gate(|| self.shared.paused_all.store(false, Ordering::SeqCst));
        info!("Resumed all tasks");
    }

    pub fn is_paused_all(&self) -> bool {
        self.shared.paused_all.load(Ordering::SeqCst)
    }

    /// True when no task of `sheet` is still pending or running.
    pub fn all_settled(&self, sheet: SheetId) -> bool {
        !has_live(&self.shared.registry(), sheet)
    }

    /// Blocks until every task owned by `sheet` is in a terminal state,
    /// including tasks spawned on it while waiting.
    pub fn join_all(&self, sheet: SheetId) {
        let mut registry = self.shared.registry();
        while has_live(&registry, sheet) {
            registry = self
                .shared
                .settled
                .wait(registry)
                .unwrap_or_else(PoisonError::into_inner);
        }
        debug!("Joined all tasks of sheet {}", sheet);
    }

    /// Like `join_all` but gives up at `deadline`. Returns true if settled.
    fn join_until(&self, sheet: SheetId, deadline: Instant) -> bool {
        let mut registry = self.shared.registry();
        while has_live(&registry, sheet) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            registry = self
                .shared
                .settled
                .wait_timeout(registry, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Removes a finished task from the registry.
    pub fn acknowledge(&self, id: TaskId) -> bool {
        let mut registry = self.shared.registry();
        match registry.get(&id) {
            Some(task) if task.status().is_terminal() => {
                registry.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Sheet is closing: cancel its tasks, wait for them within the grace
    /// period, detach whatever is still running and forget them all.
    /// Returns the number of detached tasks.
    pub fn teardown(&self, sheet: SheetId) -> usize {
        let tasks = self.list(sheet);
        if tasks.is_empty() {
            return 0;
        }
        for task in &tasks {
            self.cancel(task.id());
        }
        let settled = self.join_until(sheet, Instant::now() + self.abandon_after);

        let mut detached = 0;
        let mut registry = self.shared.registry();
        for task in tasks {
            if !settled && !task.status().is_terminal() {
                warn!(
                    "Task {} ({}) ignored cancellation for {:?}; detaching it",
                    task.id(),
                    task.label(),
                    self.abandon_after
                );
                task.detach();
                detached += 1;
            }
            registry.remove(&task.id());
        }
        info!("Tore down sheet {} ({} detached)", sheet, detached);
        detached
    }
}

fn has_live<S: Sheet>(registry: &BTreeMap<TaskId, Arc<Task<S>>>, sheet: SheetId) -> bool {
    registry
        .values()
        .any(|t| t.sheet_id() == sheet && !t.status().is_terminal())
}

fn run_task<S: Sheet>(
    shared: Arc<Shared<S>>,
    task: Arc<Task<S>>,
    command: Command<S>,
    args: Vec<String>,
    env: CommandEnv<S>,
    prompter: Arc<dyn Prompter>,
) {
    if task.sheet().is_none() {
        debug!("Task {}: sheet is gone before start", task.id());
        task.finish(Err(CommandError::Cancelled));
        shared.settle(&task);
        return;
    }
    if task.is_cancel_requested() {
        task.finish(Err(CommandError::Cancelled));
        shared.settle(&task);
        return;
    }
    task.advance(TaskStatus::Running);

    let control = TaskControl {
        task: Arc::clone(&task),
        shared: Arc::clone(&shared),
    };
    let mut ctx = CommandContext::new(env, task.sheet_ref(), prompter, Some(control));
    let result = panic::catch_unwind(AssertUnwindSafe(|| command.invoke(&mut ctx, &args)))
        .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(payload))));
    drop(ctx);

    if task.is_detached() {
        debug!("Detached task {} finished; result discarded", task.id());
    }
    let status = task.finish(result);
    info!(
        "Task {} ({}) {} after {:?}",
        task.id(),
        task.label(),
        status.label(),
        task.elapsed()
    );
    shared.settle(&task);
}

/// The worker-side handle a command context uses to honour cancel/pause and
/// report progress.
pub struct TaskControl<S: Sheet> {
    task: Arc<Task<S>>,
    shared: Arc<Shared<S>>,
}

impl<S: Sheet> TaskControl<S> {
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn sheet_id(&self) -> SheetId {
        self.task.sheet_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancel_requested()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.task.cancel_flag()
    }

    fn held(&self) -> bool {
        (self.task.is_paused() || self.shared.paused_all.load(Ordering::SeqCst))
            && !self.task.is_cancel_requested()
    }

    pub fn checkpoint(&self) -> Result<(), CommandError> {
        if self.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        let gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let _gate = self
            .shared
            .gate_changed
            .wait_while(gate, |_| self.held())
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        Ok(())
    }

    pub fn set_progress(&self, completed: u64, total: Option<u64>) {
        self.task.set_progress(Progress { completed, total });
    }
}
