//! # Core Engine
//!
//! Command execution, background tasks, status and session replay.
//! It knows nothing about any specific UI technology.
//!
//! ```text
//!   key ──▶ Dispatcher ──┬──▶ sync body (main context)
//!              │         └──▶ TaskManager ──▶ workers ──┐
//!              │                                        │ progress, outcome
//!          Recorder                                     ▼
//!              │                              StatusAggregator ──▶ snapshot
//!              ▼
//!          ReplayLog ──▶ ReplayEngine ──▶ Dispatcher (barrier per entry)
//! ```
//!
//! ## Modules
//!
//! - [`command`]: `Command`, execution modes and the context bodies run in
//! - [`registry`]: layered commands and key bindings (instance > type > global)
//! - [`dispatch`]: key/command → inline run or spawned task
//! - [`task`], [`task_manager`]: task lifecycle, cancel, pause, join
//! - [`status`]: messages and renderable progress
//! - [`prompt`]: the single-slot question/answer exchange
//! - [`session`], [`replay`]: recording and replaying sessions
//! - [`state`]: the `App` context object
//! - [`action`]: messages from workers and effects for the adapter
//! - [`config`]: settings

pub mod action;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod prompt;
pub mod registry;
pub mod replay;
pub mod session;
pub mod state;
pub mod status;
pub mod task;
pub mod task_manager;
