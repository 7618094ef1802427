//! # Actions and Effects
//!
//! Workers never touch the UI. Anything they need from the main loop arrives
//! there as an `Action` over an `mpsc` channel and is drained once per frame.
//!
//! Synchronous commands run on the main context already; when they need the
//! adapter to do something outside the engine (quit, open an editor) they
//! return an `Effect` instead.
//!
//! ```text
//! worker  ──Action──▶  main loop
//! command ──Effect──▶  adapter
//! ```

use crate::core::prompt::PromptRequest;
use crate::core::task::TaskId;

#[derive(Debug)]
pub enum Action {
    /// A worker is blocked until this prompt is answered.
    Prompt(PromptRequest),
    /// A task reached a terminal state.
    TaskSettled(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Quit,
    /// Hand the current prompt-line text to an external editor.
    ExternalEditor,
}
