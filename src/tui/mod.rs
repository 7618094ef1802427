//! # TUI Adapter
//!
//! The ratatui/crossterm layer. Turns key presses into `KeyToken`s for the
//! dispatcher, answers worker prompts on the prompt line, drives a replay
//! without blocking, and redraws the active sheet and the status region.
//!
//! Nothing in `core` or `sheet` knows about the terminal.
//!
//! ## Event Loop
//!
//! Each iteration: draw if needed, poll input (80ms while tasks run or a
//! replay is going, 500ms otherwise), handle every pending key, drain the
//! worker channel, then advance the replay by at most one entry.
//!
//! ## Keys
//!
//! - Normal mode: chords accumulate while `is_prefix` says a longer binding
//!   exists; the full token goes to `Dispatcher::dispatch_key`.
//! - While a prompt is open the mode is `Custom("edit")`: bound keys
//!   (`Ctrl+O`, `Ctrl+C`, `Ctrl+Z`) are dispatched, everything else edits
//!   the line.
//! - During a replay only unrecorded commands (the task controls) are
//!   dispatched, and `Esc` aborts the replay.

mod component;
mod components;
pub mod editor;
mod event;
mod ui;

use std::collections::{HashMap, VecDeque};
use std::io::stdout;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::cursor::SetCursorStyle;
use crossterm::execute;
use log::{debug, info, warn};
use tokio::runtime::Handle;

use crate::core::action::{Action, Effect};
use crate::core::config::ResolvedConfig;
use crate::core::dispatch::{DispatchOutcome, Invocation};
use crate::core::prompt::{ChannelPrompter, NoPrompter, PromptRequest};
use crate::core::registry::{InputMode, KeyToken};
use crate::core::replay::{ReplayEngine, ReplayProgress};
use crate::core::session::Recorder;
use crate::core::state::App;
use crate::sheet::commands::{self, EDIT_MODE};
use crate::sheet::{Sheet, SheetId, TableSheet};
use crate::tui::component::EventHandler;
use crate::tui::components::{PromptEvent, PromptLine, SheetViewState};
use crate::tui::event::{TuiEvent, poll_event_immediate, poll_event_timeout};

const BUSY_POLL: Duration = Duration::from_millis(80);
const IDLE_POLL: Duration = Duration::from_millis(500);

/// How the session starts.
#[derive(Default)]
pub struct Session {
    /// Opened on the first sheet at startup. Ignored when replaying.
    pub files: Vec<PathBuf>,
    pub replay: Option<ReplayEngine<TableSheet>>,
    /// Where to save the recording when the session ends.
    pub record: Option<PathBuf>,
}

/// Presentation state owned by the adapter.
#[derive(Default)]
pub struct TuiState {
    /// Scroll offsets per sheet
    pub views: HashMap<SheetId, SheetViewState>,
    /// Open while the front prompt request is being answered
    pub prompt: Option<PromptLine>,
    /// Keys of an unfinished chord
    pub pending_keys: Option<KeyToken>,
    pub replay_position: Option<(usize, usize)>,
}

struct TerminalModeGuard;

impl TerminalModeGuard {
    fn new() -> std::io::Result<Self> {
        // Disambiguated escapes keep a lone Esc apart from Alt chords.
        execute!(
            stdout(),
            EnableBracketedPaste,
            SetCursorStyle::SteadyBlock,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )?;
        info!("Terminal modes enabled (bracketed paste, keyboard enhancement)");
        Ok(Self)
    }
}

impl Drop for TerminalModeGuard {
    fn drop(&mut self) {
        let _ = execute!(stdout(), PopKeyboardEnhancementFlags, DisableBracketedPaste);
    }
}

/// Adapter state that the event loop threads through its handlers.
struct Tui {
    app: App<TableSheet>,
    state: TuiState,
    prompts: VecDeque<PromptRequest>,
    replay: Option<ReplayEngine<TableSheet>>,
    rx: Receiver<Action>,
    edit_mode: InputMode,
}

impl Tui {
    fn new(config: &ResolvedConfig, session: &mut Session) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut app = App::new(Handle::current(), config)
            .with_prompters(Arc::new(NoPrompter), Arc::new(ChannelPrompter::new(tx.clone())));
        if session.record.is_some() {
            app = app.with_recorder(Recorder::new());
        }
        app.tasks().set_notifier(tx);

        let replay = session.replay.take();
        let files: &[PathBuf] = if replay.is_some() { &[] } else { &session.files };
        if replay.is_some() && !session.files.is_empty() {
            warn!("Replaying: ignoring {} files given on the command line", session.files.len());
        }
        commands::start(app.dispatcher(), files);

        Self {
            app,
            state: TuiState::default(),
            prompts: VecDeque::new(),
            replay,
            rx,
            edit_mode: InputMode::custom(EDIT_MODE),
        }
    }

    fn busy(&self) -> bool {
        self.replay.is_some() || !self.app.tasks().all().is_empty()
    }

    /// Opens the prompt line for the oldest waiting request.
    fn activate_prompt(&mut self) {
        if self.state.prompt.is_none()
            && let Some(front) = self.prompts.front()
        {
            self.state.prompt = Some(PromptLine::new(&front.question.text));
        }
    }

    /// Aborts prompts whose task was cancelled or already finished.
    fn prune_prompts(&mut self) {
        let tasks = self.app.tasks();
        let stale = |req: &PromptRequest| match req.question.task {
            Some(id) => tasks
                .get(id)
                .is_none_or(|t| t.is_cancel_requested() || t.status().is_terminal()),
            None => false,
        };
        let front_stale = self.prompts.front().is_some_and(stale);
        let (dead, live): (VecDeque<_>, VecDeque<_>) = self.prompts.drain(..).partition(stale);
        for req in dead {
            debug!("Aborting prompt '{}' of a stopped task", req.question.text);
            req.abort();
        }
        self.prompts = live;
        if front_stale {
            self.state.prompt = None;
        }
        self.activate_prompt();
    }

    fn drain_actions(&mut self) -> bool {
        let mut any = false;
        while let Ok(action) = self.rx.try_recv() {
            any = true;
            debug!("Event loop received: {:?}", action);
            match action {
                Action::Prompt(request) => self.prompts.push_back(request),
                Action::TaskSettled(_) => {}
            }
        }
        if any {
            self.prune_prompts();
        }
        any
    }

    fn step_replay(&mut self) {
        let Some(engine) = self.replay.as_mut() else {
            return;
        };
        let status = &self.app.env().status;
        match engine.poll(self.app.dispatcher()) {
            Ok(ReplayProgress::Submitted(_)) | Ok(ReplayProgress::Waiting) => {
                self.state.replay_position = Some((engine.position(), engine.len()));
            }
            Ok(ReplayProgress::Finished) => {
                status.info(format!("replay finished ({} entries)", engine.len()));
                self.replay = None;
                self.state.replay_position = None;
            }
            Err(e) => {
                status.error(e.to_string());
                self.replay = None;
                self.state.replay_position = None;
            }
        }
    }

    fn abort_replay(&mut self) {
        if let Some(mut engine) = self.replay.take() {
            engine.abort();
            self.app
                .status()
                .warn(format!("replay aborted before entry {}", engine.position() + 1));
        }
        self.state.replay_position = None;
    }

    /// Keys while the prompt line is open.
    fn handle_edit_key(&mut self, event: &TuiEvent) -> Vec<Effect> {
        if let TuiEvent::Key(key) = event
            && let Ok((command, sheet)) = self.app.dispatcher().resolve(key, &self.edit_mode)
        {
            let invocation = Invocation::new(command, sheet)
                .mode(self.edit_mode.clone())
                .key(key.clone());
            let effects = match self.app.dispatcher().dispatch(invocation) {
                DispatchOutcome::Completed(effects) => effects,
                _ => Vec::new(),
            };
            // A cancel may have stopped the task that is asking.
            self.prune_prompts();
            return effects;
        }

        let Some(line) = self.state.prompt.as_mut() else {
            return Vec::new();
        };
        match line.handle_event(event) {
            Some(PromptEvent::Submit(text)) => {
                self.state.prompt = None;
                if let Some(request) = self.prompts.pop_front() {
                    request.answer(text);
                }
                self.activate_prompt();
            }
            Some(PromptEvent::Abort) => {
                self.state.prompt = None;
                if let Some(request) = self.prompts.pop_front() {
                    request.abort();
                }
                self.activate_prompt();
            }
            Some(PromptEvent::Changed) | None => {}
        }
        Vec::new()
    }

    /// Keys in normal mode: chord accumulation, then dispatch.
    fn handle_normal_key(&mut self, key: KeyToken) -> Vec<Effect> {
        let pending = self.state.pending_keys.take();
        if pending.is_some() && key.as_str() == "Esc" {
            return Vec::new();
        }
        let token = match pending {
            Some(prefix) => prefix.then(&key),
            None => key,
        };
        let Some(sheet) = self.app.active_sheet() else {
            return Vec::new();
        };
        if self
            .app
            .registry()
            .is_prefix(&token, &InputMode::Normal, sheet.sheet_type(), sheet.id())
        {
            self.state.pending_keys = Some(token);
            return Vec::new();
        }
        match self.app.dispatcher().dispatch_key(&token, &InputMode::Normal) {
            Ok(DispatchOutcome::Completed(effects)) => effects,
            Ok(_) | Err(_) => Vec::new(),
        }
    }

    fn handle_event(&mut self, event: TuiEvent) -> Vec<Effect> {
        let key = match &event {
            TuiEvent::Resize => return Vec::new(),
            TuiEvent::Paste(_) => return self.handle_edit_key(&event),
            TuiEvent::Key(key) => key.clone(),
        };
        if self.state.prompt.is_some() {
            return self.handle_edit_key(&event);
        }
        if self.replay.is_some() {
            if key.as_str() == "Esc" {
                self.abort_replay();
                return Vec::new();
            }
            let control = self
                .app
                .dispatcher()
                .resolve(&key, &InputMode::Normal)
                .is_ok_and(|(command, _)| !command.recorded);
            if !control {
                return Vec::new();
            }
        }
        self.handle_normal_key(key)
    }

    /// Runs `$EDITOR` on the prompt line text with the terminal suspended.
    fn edit_prompt_externally(
        &mut self,
        terminal: &mut ratatui::DefaultTerminal,
        guard: &mut Option<TerminalModeGuard>,
    ) {
        let Some(line) = self.state.prompt.as_mut() else {
            self.app.status().warn("nothing to edit");
            return;
        };
        *guard = None;
        ratatui::restore();
        let result = editor::edit_text(&self.app.env().config.editor, line.text());
        *terminal = ratatui::init();
        *guard = TerminalModeGuard::new().ok();
        match result {
            Ok(text) => line.set_text(&text),
            Err(e) => {
                warn!("External editor failed: {}", e);
                self.app.status().error(format!("editor: {e}"));
            }
        }
    }

    fn finish(mut self, record: Option<PathBuf>) {
        // Dropping the requests unblocks their workers with an abort.
        self.prompts.clear();
        let detached = self.app.shutdown();
        if detached > 0 {
            warn!("{} tasks did not stop and were detached", detached);
        }
        if let (Some(path), Some(recorder)) = (record, self.app.recorder()) {
            match recorder.save(&path) {
                Ok(()) => info!("Saved {} recorded entries to {:?}", recorder.len(), path),
                Err(e) => warn!("Failed to save recording to {:?}: {}", path, e),
            }
        }
    }
}

pub fn run(config: ResolvedConfig, mut session: Session) -> std::io::Result<()> {
    let mut tui = Tui::new(&config, &mut session);

    let mut terminal = ratatui::init();
    let mut guard = TerminalModeGuard::new().ok();
    let mut needs_redraw = true;

    loop {
        let busy = tui.busy();
        if busy {
            needs_redraw = true;
        }
        if needs_redraw {
            terminal.draw(|f| ui::draw_ui(f, &tui.app, &mut tui.state))?;
            needs_redraw = false;
        }

        let first_event = poll_event_timeout(if busy { BUSY_POLL } else { IDLE_POLL });
        if first_event.is_some() {
            needs_redraw = true;
        }

        let mut should_quit = false;
        for event in first_event
            .into_iter()
            .chain(std::iter::from_fn(poll_event_immediate))
        {
            for effect in tui.handle_event(event) {
                match effect {
                    Effect::Quit => should_quit = true,
                    Effect::ExternalEditor => {
                        tui.edit_prompt_externally(&mut terminal, &mut guard)
                    }
                }
            }
        }

        if tui.drain_actions() {
            needs_redraw = true;
        }
        tui.step_replay();

        if tui.replay.is_none() && tui.app.workspace().is_empty() {
            should_quit = true;
        }
        if should_quit {
            break;
        }
    }

    drop(guard);
    ratatui::restore();
    tui.finish(session.record);
    Ok(())
}
