//! # Commands
//!
//! A command is a named body plus an execution mode. The body is a plain
//! closure over a [`CommandContext`] and the invocation arguments; it does not
//! know whether it is running on the main context or on a task worker, except
//! that `checkpoint()` only ever blocks or fails on a worker.
//!
//! Bodies that run for long must call `ctx.checkpoint()` at safe points.
//! Cancellation is cooperative: nothing preempts a body that never polls.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::core::action::Effect;
use crate::core::config::ResolvedConfig;
use crate::core::prompt::{PromptError, Prompter, Question};
use crate::core::registry::CommandRegistry;
use crate::core::status::{Severity, StatusAggregator};
use crate::core::task::TaskId;
use crate::core::task_manager::{TaskControl, TaskManager};
use crate::sheet::{Sheet, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Always runs on the calling (main) context.
    Sync,
    /// Always handed to the task manager.
    Async,
    /// The invocation decides; synchronous unless asked otherwise.
    CallerDecides,
}

impl ExecMode {
    pub fn runs_in_background(self, requested: Option<bool>) -> bool {
        match self {
            ExecMode::Sync => false,
            ExecMode::Async => true,
            ExecMode::CallerDecides => requested.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Failed(String),
    InvalidArgs(String),
    /// The body observed a cancellation request and unwound.
    Cancelled,
    Prompt(PromptError),
    Panicked(String),
}

impl CommandError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CommandError::Failed(msg.into())
    }

    /// True when the failure came from running out of recorded answers.
    pub fn is_answers_exhausted(&self) -> bool {
        matches!(self, CommandError::Prompt(PromptError::Exhausted { .. }))
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Failed(msg) => write!(f, "{msg}"),
            CommandError::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            CommandError::Cancelled => write!(f, "cancelled"),
            CommandError::Prompt(e) => write!(f, "{e}"),
            CommandError::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<PromptError> for CommandError {
    fn from(e: PromptError) -> Self {
        CommandError::Prompt(e)
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub type CommandBody<S> =
    dyn Fn(&mut CommandContext<S>, &[String]) -> Result<(), CommandError> + Send + Sync;

pub struct Command<S: Sheet> {
    pub name: String,
    pub description: String,
    pub exec_mode: ExecMode,
    /// Whether dispatches of this command go into a recorded session.
    pub recorded: bool,
    body: Arc<CommandBody<S>>,
}

impl<S: Sheet> Command<S> {
    pub fn new<F>(name: &str, description: &str, exec_mode: ExecMode, body: F) -> Self
    where
        F: Fn(&mut CommandContext<S>, &[String]) -> Result<(), CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            exec_mode,
            recorded: true,
            body: Arc::new(body),
        }
    }

    /// Marks a presentation-only command that replay has no use for.
    pub fn unrecorded(mut self) -> Self {
        self.recorded = false;
        self
    }

    pub fn invoke(&self, ctx: &mut CommandContext<S>, args: &[String]) -> Result<(), CommandError> {
        (self.body)(ctx, args)
    }
}

impl<S: Sheet> Clone for Command<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            exec_mode: self.exec_mode,
            recorded: self.recorded,
            body: Arc::clone(&self.body),
        }
    }
}

impl<S: Sheet> fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("exec_mode", &self.exec_mode)
            .field("recorded", &self.recorded)
            .finish_non_exhaustive()
    }
}

/// The shared pieces every command execution sees.
pub struct CommandEnv<S: Sheet> {
    pub workspace: Workspace<S>,
    pub status: StatusAggregator,
    pub tasks: Arc<TaskManager<S>>,
    pub registry: Arc<CommandRegistry<S>>,
    pub config: Arc<ResolvedConfig>,
}

impl<S: Sheet> Clone for CommandEnv<S> {
    fn clone(&self) -> Self {
        Self {
            workspace: self.workspace.clone(),
            status: self.status.clone(),
            tasks: Arc::clone(&self.tasks),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

/// What a command body gets to work with for one execution.
///
/// The target sheet is held weakly: a task never keeps its sheet alive, and
/// once the sheet is gone `sheet()` fails with `Cancelled`.
pub struct CommandContext<S: Sheet> {
    env: CommandEnv<S>,
    sheet: Weak<S>,
    prompter: Arc<dyn Prompter>,
    control: Option<TaskControl<S>>,
    effects: Vec<Effect>,
}

impl<S: Sheet> CommandContext<S> {
    pub(crate) fn new(
        env: CommandEnv<S>,
        sheet: Weak<S>,
        prompter: Arc<dyn Prompter>,
        control: Option<TaskControl<S>>,
    ) -> Self {
        Self {
            env,
            sheet,
            prompter,
            control,
            effects: Vec::new(),
        }
    }

    pub fn sheet(&self) -> Result<Arc<S>, CommandError> {
        self.sheet.upgrade().ok_or_else(|| {
            log::debug!("Target sheet of {:?} is gone", self.task_id());
            CommandError::Cancelled
        })
    }

    pub fn workspace(&self) -> &Workspace<S> {
        &self.env.workspace
    }

    pub fn registry(&self) -> &CommandRegistry<S> {
        &self.env.registry
    }

    pub fn tasks(&self) -> &TaskManager<S> {
        &self.env.tasks
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.env.status
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.env.config
    }

    /// The task running this body, if it is not on the main context.
    pub fn task_id(&self) -> Option<TaskId> {
        self.control.as_ref().map(TaskControl::id)
    }

    pub fn post(&self, text: impl Into<String>) {
        self.env.status.post(text, Severity::Info);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.env.status.post(text, Severity::Warning);
    }

    /// Asks one question and waits for the answer. Only the calling worker
    /// is suspended. Cancelling the task ends the wait.
    pub fn prompt(&self, text: &str) -> Result<String, CommandError> {
        self.checkpoint()?;
        let question = Question {
            text: text.to_string(),
            task: self.task_id(),
            cancel: self.control.as_ref().map(TaskControl::cancel_flag),
        };
        let answer = self.prompter.ask(&question);
        // A cancelled task reports Cancelled, not the aborted prompt.
        self.checkpoint()?;
        Ok(answer?)
    }

    /// Asks a yes/no question; anything but an answer starting with `y` is no.
    pub fn confirm(&self, text: &str) -> Result<bool, CommandError> {
        let answer = self.prompt(text)?;
        Ok(answer.trim().to_lowercase().starts_with('y'))
    }

    /// Safe point: fails with `Cancelled` if cancellation was requested and
    /// blocks while the task is paused. A no-op on the main context.
    pub fn checkpoint(&self) -> Result<(), CommandError> {
        match &self.control {
            Some(control) => control.checkpoint(),
            None => Ok(()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(TaskControl::is_cancelled)
    }

    pub fn set_progress(&self, completed: u64, total: Option<u64>) {
        if let Some(control) = &self.control {
            control.set_progress(completed, total);
        }
    }

    /// Requests an adapter-side effect. Only honoured for synchronous
    /// commands; a worker has no adapter to talk to.
    pub fn request(&mut self, effect: Effect) {
        if self.control.is_some() {
            log::warn!("Effect {:?} requested from a task, ignored", effect);
            return;
        }
        self.effects.push(effect);
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Closes a sheet: removes it from the workspace and tears down its
    /// tasks. Tasks waiting on a prompt give up as soon as teardown cancels
    /// them. Must not be called from a task bound to the same sheet.
    pub fn close_sheet(&self, sheet: &Arc<S>) -> Result<(), CommandError> {
        if let Some(control) = &self.control
            && control.sheet_id() == sheet.id()
        {
            return Err(CommandError::failed(
                "a task cannot close the sheet it is running on",
            ));
        }
        self.env.workspace.remove(sheet.id());
        self.env.tasks.teardown(sheet.id());
        self.env.registry.forget_instance(sheet.id());
        Ok(())
    }
}
