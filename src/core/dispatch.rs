//! # Dispatcher
//!
//! Turns a key (or a named command) into an execution:
//!
//! ```text
//! key ──resolve──▶ Command ──┬── sync  ──▶ body on this context ──▶ Completed / Failed
//!                            └── async ──▶ TaskManager::spawn   ──▶ Spawned(task)
//! ```
//!
//! When a recorder is attached, every dispatch of a recorded command is
//! appended to the log *before* the body runs, and the prompter handed to the
//! body is wrapped so answers land on that same entry. A spawned task is
//! tracked on its entry so a later cancellation is recorded there too.
//!
//! Failures never escape: errors and panics from synchronous bodies are
//! caught here and posted to the status aggregator.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::core::action::Effect;
use crate::core::command::{Command, CommandContext, CommandEnv, CommandError, panic_message};
use crate::core::prompt::{NoPrompter, Prompter};
use crate::core::registry::{InputMode, KeyToken};
use crate::core::session::{Recorder, RecordingPrompter, ReplayEntry};
use crate::core::task::Task;
use crate::sheet::Sheet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    NotFound { token: KeyToken, mode: InputMode },
    /// A binding names a command nothing registers.
    UnknownCommand(String),
    NoActiveSheet,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotFound { token, mode } => {
                write!(f, "no command for key {} in {} mode", token, mode.label())
            }
            DispatchError::UnknownCommand(name) => write!(f, "no command named '{name}'"),
            DispatchError::NoActiveSheet => write!(f, "no active sheet"),
        }
    }
}

impl std::error::Error for DispatchError {}

pub enum DispatchOutcome<S: Sheet> {
    /// A synchronous body returned Ok, with any effects it requested.
    Completed(Vec<Effect>),
    /// A synchronous body failed (already reported).
    Failed(CommandError),
    Spawned(Arc<Task<S>>),
}

impl<S: Sheet> fmt::Debug for DispatchOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Completed(effects) => f.debug_tuple("Completed").field(effects).finish(),
            DispatchOutcome::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            DispatchOutcome::Spawned(task) => f.debug_tuple("Spawned").field(&task.id()).finish(),
        }
    }
}

/// One request to run a command against a sheet.
pub struct Invocation<S: Sheet> {
    command: Command<S>,
    sheet: Arc<S>,
    args: Vec<String>,
    mode: InputMode,
    key: Option<KeyToken>,
    background: Option<bool>,
    prompter: Option<Arc<dyn Prompter>>,
    cancelled: bool,
}

impl<S: Sheet> Invocation<S> {
    pub fn new(command: Command<S>, sheet: Arc<S>) -> Self {
        Self {
            command,
            sheet,
            args: Vec::new(),
            mode: InputMode::Normal,
            key: None,
            background: None,
            prompter: None,
            cancelled: false,
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn mode(mut self, mode: InputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn key(mut self, key: KeyToken) -> Self {
        self.key = Some(key);
        self
    }

    /// Only consulted for caller-decided commands.
    pub fn background(mut self, background: bool) -> Self {
        self.background = Some(background);
        self
    }

    /// Overrides the dispatcher's default input source.
    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// A background run is cancelled before its body starts. Has no effect
    /// on commands that run inline.
    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }
}

pub struct Dispatcher<S: Sheet> {
    env: CommandEnv<S>,
    recorder: Option<Recorder>,
    main_prompter: Arc<dyn Prompter>,
    worker_prompter: Arc<dyn Prompter>,
}

impl<S: Sheet> Dispatcher<S> {
    pub fn new(env: CommandEnv<S>) -> Self {
        Self {
            env,
            recorder: None,
            main_prompter: Arc::new(NoPrompter),
            worker_prompter: Arc::new(NoPrompter),
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Input sources for synchronous bodies and for task workers.
    pub fn with_prompters(mut self, main: Arc<dyn Prompter>, worker: Arc<dyn Prompter>) -> Self {
        self.main_prompter = main;
        self.worker_prompter = worker;
        self
    }

    pub fn env(&self) -> &CommandEnv<S> {
        &self.env
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    /// Resolves a key against the active sheet.
    pub fn resolve(&self, token: &KeyToken, mode: &InputMode) -> Result<(Command<S>, Arc<S>), DispatchError> {
        let sheet = self.env.workspace.top().ok_or(DispatchError::NoActiveSheet)?;
        let command = self
            .env
            .registry
            .resolve(token, mode, sheet.sheet_type(), sheet.id())?;
        Ok((command, sheet))
    }

    /// Resolves and dispatches a key. A key that resolves to nothing is
    /// posted as a warning; no task is created.
    pub fn dispatch_key(&self, token: &KeyToken, mode: &InputMode) -> Result<DispatchOutcome<S>, DispatchError> {
        match self.resolve(token, mode) {
            Ok((command, sheet)) => Ok(self.dispatch(
                Invocation::new(command, sheet)
                    .mode(mode.clone())
                    .key(token.clone()),
            )),
            Err(e) => {
                debug!("Dispatch miss: {}", e);
                self.env.status.warn(e.to_string());
                Err(e)
            }
        }
    }

    pub fn dispatch(&self, invocation: Invocation<S>) -> DispatchOutcome<S> {
        let Invocation {
            command,
            sheet,
            args,
            mode,
            key,
            background,
            prompter,
            cancelled,
        } = invocation;
        let in_background = command.exec_mode.runs_in_background(background);
        let mut prompter = prompter.unwrap_or_else(|| {
            if in_background {
                Arc::clone(&self.worker_prompter)
            } else {
                Arc::clone(&self.main_prompter)
            }
        });

        let mut recorded_entry = None;
        if let Some(recorder) = &self.recorder
            && command.recorded
        {
            let entry = recorder.append(ReplayEntry {
                args: args.clone(),
                mode: mode.clone(),
                key: key.clone(),
                background: in_background,
                ..ReplayEntry::new(&command.name, &sheet.name())
            });
            prompter = Arc::new(RecordingPrompter::new(recorder.clone(), entry, prompter));
            recorded_entry = Some((recorder, entry));
        }

        info!(
            "Dispatch {} on '{}' args={:?} key={} ({})",
            command.name,
            sheet.name(),
            args,
            key.as_ref().map(KeyToken::as_str).unwrap_or("-"),
            if in_background { "task" } else { "inline" }
        );

        if in_background {
            let tasks = &self.env.tasks;
            let task = if cancelled {
                tasks.spawn_cancelled(command, &sheet, args, self.env.clone(), prompter)
            } else {
                tasks.spawn(command, &sheet, args, self.env.clone(), prompter)
            };
            if let Some((recorder, entry)) = recorded_entry {
                recorder.track(entry, task.clone());
            }
            return DispatchOutcome::Spawned(task);
        }

        // The local `sheet` outlives the body, so the context's handle stays valid.
        let mut ctx = CommandContext::new(self.env.clone(), Arc::downgrade(&sheet), prompter, None);
        let result = panic::catch_unwind(AssertUnwindSafe(|| command.invoke(&mut ctx, &args)))
            .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(payload))));
        match result {
            Ok(()) => DispatchOutcome::Completed(ctx.take_effects()),
            Err(CommandError::Cancelled) => {
                self.env.status.info(format!("{} cancelled", command.name));
                DispatchOutcome::Failed(CommandError::Cancelled)
            }
            Err(e) => {
                warn!("Command {} failed: {}", command.name, e);
                self.env.status.error(format!("{}: {}", command.name, e));
                DispatchOutcome::Failed(e)
            }
        }
    }
}
