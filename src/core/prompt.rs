//! # Interactive Prompts
//!
//! A command body that needs input calls `ctx.prompt(..)`. The question goes
//! to a [`Prompter`], which hands back exactly one answer. That single-slot
//! exchange is the only place live input and recorded input differ:
//!
//! ```text
//! worker ──ask──▶ ChannelPrompter ──Action::Prompt──▶ main loop (prompt line)
//!        ◀─answer─ sync_channel(1) ◀──────────────────┘
//!
//! replay ──ask──▶ ScriptedPrompter (recorded answers, in order)
//! ```
//!
//! While a worker waits for its answer only that worker is suspended. A
//! waiting worker whose task gets cancelled stops waiting within
//! [`CANCEL_POLL`] and sees the prompt as aborted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};

use crate::core::action::Action;
use crate::core::task::TaskId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// More questions were asked than answers were recorded.
    Exhausted { recorded: usize },
    /// The user dismissed the prompt.
    Aborted,
    /// No input source is attached to this execution context.
    Unavailable,
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::Exhausted { recorded } => {
                write!(f, "prompt asked after all {recorded} recorded answers were used")
            }
            PromptError::Aborted => write!(f, "input aborted"),
            PromptError::Unavailable => write!(f, "no input available in this context"),
        }
    }
}

impl std::error::Error for PromptError {}

pub const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A cancellation request shared between a task and whatever it waits on.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Raises the flag; true only for the call that raised it.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl PartialEq for CancelFlag {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CancelFlag {}

/// One question, tagged with the task asking it (None on the main context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub task: Option<TaskId>,
    /// Raised when the asking task is cancelled.
    pub cancel: Option<CancelFlag>,
}

impl Question {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            task: None,
            cancel: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_raised)
    }
}

pub trait Prompter: Send + Sync {
    fn ask(&self, question: &Question) -> Result<String, PromptError>;
}

/// Always refuses. Used for synchronous commands in the interactive UI, where
/// the main context cannot wait on itself.
pub struct NoPrompter;

impl Prompter for NoPrompter {
    fn ask(&self, question: &Question) -> Result<String, PromptError> {
        warn!("Prompt '{}' has no input source", question.text);
        Err(PromptError::Unavailable)
    }
}

/// Answers from a fixed list, in order. Replay feeds recorded answers
/// through this; tests use it to stand in for a user.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    recorded: usize,
    /// Once the answers run out, abort instead of reporting exhaustion.
    then_abort: bool,
    asked: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn new(answers: Vec<String>) -> Self {
        Self {
            recorded: answers.len(),
            answers: Mutex::new(answers.into()),
            then_abort: false,
            asked: AtomicUsize::new(0),
        }
    }

    /// The prompt after the last answer is dismissed, as a user pressing
    /// Esc would.
    pub fn then_abort(mut self, abort: bool) -> Self {
        self.then_abort = abort;
        self
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &Question) -> Result<String, PromptError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let next = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(answer) => {
                debug!("Scripted answer for '{}': {:?}", question.text, answer);
                Ok(answer)
            }
            None if self.then_abort => {
                debug!("Scripted abort for '{}'", question.text);
                Err(PromptError::Aborted)
            }
            None => Err(PromptError::Exhausted {
                recorded: self.recorded,
            }),
        }
    }
}

/// A pending question waiting on the main loop. Dropping it without
/// answering aborts the prompt.
#[derive(Debug)]
pub struct PromptRequest {
    pub question: Question,
    reply: SyncSender<Option<String>>,
}

impl PromptRequest {
    pub fn answer(self, text: String) {
        if self.reply.send(Some(text)).is_err() {
            warn!("Prompt answer dropped: asker went away");
        }
    }

    pub fn abort(self) {
        let _ = self.reply.send(None);
    }
}

/// Forwards questions to the main loop over the action channel and blocks
/// the calling worker until the answer comes back.
pub struct ChannelPrompter {
    tx: Mutex<Sender<Action>>,
}

impl ChannelPrompter {
    pub fn new(tx: Sender<Action>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl Prompter for ChannelPrompter {
    fn ask(&self, question: &Question) -> Result<String, PromptError> {
        let (reply, answer) = mpsc::sync_channel(1);
        let request = PromptRequest {
            question: question.clone(),
            reply,
        };
        let sent = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Action::Prompt(request));
        if sent.is_err() {
            warn!("Prompt '{}' dropped: main loop is gone", question.text);
            return Err(PromptError::Unavailable);
        }
        loop {
            match answer.recv_timeout(CANCEL_POLL) {
                Ok(Some(text)) => return Ok(text),
                Ok(None) | Err(RecvTimeoutError::Disconnected) => return Err(PromptError::Aborted),
                Err(RecvTimeoutError::Timeout) if question.is_cancelled() => {
                    debug!("Prompt '{}' abandoned by a cancelled task", question.text);
                    return Err(PromptError::Aborted);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn question(text: &str) -> Question {
        Question::new(text)
    }

    #[test]
    fn test_scripted_answers_in_order_then_exhausts() {
        let p = ScriptedPrompter::new(vec!["a".into(), "b".into()]);
        assert_eq!(p.ask(&question("1")).unwrap(), "a");
        assert_eq!(p.ask(&question("2")).unwrap(), "b");
        assert_eq!(
            p.ask(&question("3")),
            Err(PromptError::Exhausted { recorded: 2 })
        );
        assert_eq!(p.asked(), 3);
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn test_scripted_then_abort_dismisses_after_answers() {
        let p = ScriptedPrompter::new(vec!["a".into()]).then_abort(true);
        assert_eq!(p.ask(&question("1")).unwrap(), "a");
        assert_eq!(p.ask(&question("2")), Err(PromptError::Aborted));
        assert_eq!(p.asked(), 2);
    }

    #[test]
    fn test_no_prompter_is_unavailable() {
        assert_eq!(NoPrompter.ask(&question("x")), Err(PromptError::Unavailable));
    }

    #[test]
    fn test_channel_prompter_round_trip() {
        let (tx, rx) = mpsc::channel();
        let prompter = ChannelPrompter::new(tx);
        let worker = thread::spawn(move || prompter.ask(&question("name?")));

        match rx.recv().unwrap() {
            Action::Prompt(req) => {
                assert_eq!(req.question.text, "name?");
                req.answer("bob".into());
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(worker.join().unwrap(), Ok("bob".to_string()));
    }

    #[test]
    fn test_channel_prompter_abort_on_drop() {
        let (tx, rx) = mpsc::channel();
        let prompter = ChannelPrompter::new(tx);
        let worker = thread::spawn(move || prompter.ask(&question("sure?")));
        drop(rx.recv().unwrap());
        assert_eq!(worker.join().unwrap(), Err(PromptError::Aborted));
    }

    #[test]
    fn test_channel_prompter_gives_up_when_cancelled() {
        let (tx, rx) = mpsc::channel();
        let prompter = ChannelPrompter::new(tx);
        let flag = CancelFlag::default();
        let mut q = question("still there?");
        q.cancel = Some(flag.clone());
        let worker = thread::spawn(move || prompter.ask(&q));

        // Keep the request alive so only the flag can end the wait.
        let pending = rx.recv().unwrap();
        assert!(flag.raise());
        assert!(!flag.raise());
        assert_eq!(worker.join().unwrap(), Err(PromptError::Aborted));
        drop(pending);
    }

    #[test]
    fn test_channel_prompter_without_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let prompter = ChannelPrompter::new(tx);
        assert_eq!(prompter.ask(&question("x")), Err(PromptError::Unavailable));
    }
}
