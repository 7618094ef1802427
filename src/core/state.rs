//! # Application Context
//!
//! Everything that would otherwise be ambient global state lives in one
//! `App`, constructed explicitly and torn down explicitly:
//!
//! ```text
//! App
//! └── dispatcher: Dispatcher
//!     ├── env: CommandEnv
//!     │   ├── workspace: Workspace       // sheet stack, top = active
//!     │   ├── status: StatusAggregator   // messages + history
//!     │   ├── tasks: TaskManager         // the only one in this session
//!     │   ├── registry: CommandRegistry  // commands + bindings
//!     │   └── config: ResolvedConfig
//!     ├── recorder: Option<Recorder>     // set once, before the first dispatch
//!     └── prompters (main / worker)
//! ```
//!
//! Tests build as many independent `App`s as they like.

use std::sync::Arc;

use log::info;
use tokio::runtime::Handle;

use crate::core::command::CommandEnv;
use crate::core::config::ResolvedConfig;
use crate::core::dispatch::Dispatcher;
use crate::core::prompt::Prompter;
use crate::core::registry::CommandRegistry;
use crate::core::session::Recorder;
use crate::core::status::{StatusAggregator, StatusSnapshot};
use crate::core::task_manager::TaskManager;
use crate::sheet::{Sheet, Workspace};

pub struct App<S: Sheet> {
    dispatcher: Dispatcher<S>,
}

impl<S: Sheet> App<S> {
    pub fn new(runtime: Handle, config: &ResolvedConfig) -> Self {
        let env = CommandEnv {
            workspace: Workspace::default(),
            status: StatusAggregator::new(config.status_history, config.error_retention),
            tasks: Arc::new(TaskManager::new(runtime).with_abandon_after(config.abandon_after)),
            registry: Arc::new(CommandRegistry::new()),
            config: Arc::new(config.clone()),
        };
        Self {
            dispatcher: Dispatcher::new(env),
        }
    }

    /// Puts the session in recording mode. Call before the first dispatch.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        info!("Recording session");
        self.dispatcher = self.dispatcher.with_recorder(recorder);
        self
    }

    pub fn with_prompters(mut self, main: Arc<dyn Prompter>, worker: Arc<dyn Prompter>) -> Self {
        self.dispatcher = self.dispatcher.with_prompters(main, worker);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    pub fn env(&self) -> &CommandEnv<S> {
        self.dispatcher.env()
    }

    pub fn workspace(&self) -> &Workspace<S> {
        &self.env().workspace
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.env().status
    }

    pub fn tasks(&self) -> &TaskManager<S> {
        &self.env().tasks
    }

    pub fn registry(&self) -> &CommandRegistry<S> {
        &self.env().registry
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.dispatcher.recorder()
    }

    pub fn active_sheet(&self) -> Option<Arc<S>> {
        self.workspace().top()
    }

    /// Status region contents for this refresh.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status().snapshot(self.tasks())
    }

    /// Tears down every sheet's tasks. Returns how many had to be detached.
    pub fn shutdown(&self) -> usize {
        let mut detached = 0;
        for sheet in self.workspace().sheets() {
            detached += self.tasks().teardown(sheet.id());
        }
        info!("Shutdown complete ({} tasks detached)", detached);
        detached
    }
}
