//! # Session Recording
//!
//! A recorded session is an ordered list of dispatched commands, each with
//! the answers its prompts received. The log is append-only while recording
//! and persisted once at session end as pretty JSON.
//!
//! Two outcomes are stored alongside the answers because replay cannot
//! reproduce them from input alone: a prompt that was dismissed instead of
//! answered (`aborted`) and a task that ended cancelled (`cancelled`).
//!
//! All writes use atomic rename (write `.tmp`, then `rename()`) for crash safety.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::prompt::{PromptError, Prompter, Question};
use crate::core::registry::{InputMode, KeyToken};
use crate::core::replay::ReplayError;

pub const LOG_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReplayEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub mode: InputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyToken>,
    /// Name of the sheet the command targeted.
    pub sheet: String,
    #[serde(default)]
    pub background: bool,
    /// Milliseconds since recording started.
    #[serde(default)]
    pub offset_ms: u64,
    /// Prompt answers in the order they were given.
    #[serde(default)]
    pub answers: Vec<String>,
    /// The prompt after the last answer was dismissed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub aborted: bool,
    /// The task this entry spawned ended cancelled.
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancelled: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ReplayEntry {
    pub fn new(command: &str, sheet: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            mode: InputMode::Normal,
            key: None,
            sheet: sheet.to_string(),
            background: false,
            offset_ms: 0,
            answers: Vec::new(),
            aborted: false,
            cancelled: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReplayLog {
    pub version: u32,
    pub recorded_at: DateTime<Utc>,
    pub entries: Vec<ReplayEntry>,
}

impl Default for ReplayLog {
    fn default() -> Self {
        Self {
            version: LOG_VERSION,
            recorded_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

impl ReplayLog {
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let json = fs::read_to_string(path).map_err(ReplayError::Io)?;
        let log: ReplayLog =
            serde_json::from_str(&json).map_err(|e| ReplayError::Parse(e.to_string()))?;
        if log.version != LOG_VERSION {
            return Err(ReplayError::UnsupportedVersion(log.version));
        }
        debug!("Loaded replay log {:?} ({} entries)", path, log.entries.len());
        Ok(log)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        atomic_write_json(path, self)?;
        info!("Saved replay log {:?} ({} entries)", path, self.entries.len());
        Ok(())
    }
}

/// Atomically write `data` as JSON to `path` (via `.tmp` + rename).
fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// How a spawned task ended, as far as the recording cares.
pub trait TaskOutcome: Send + Sync {
    fn ended_cancelled(&self) -> bool;
}

struct RecorderInner {
    log: ReplayLog,
    started: Instant,
    /// Tasks spawned by recorded entries, by entry index.
    tasks: Vec<(usize, Arc<dyn TaskOutcome>)>,
}

/// Shared handle to the log being recorded. Workers append answers to it
/// while the main context appends entries.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Mutex<RecorderInner>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner {
                log: ReplayLog::default(),
                started: Instant::now(),
                tasks: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an entry stamped with the current offset; returns its index.
    pub fn append(&self, mut entry: ReplayEntry) -> usize {
        let mut inner = self.lock();
        entry.offset_ms = inner.started.elapsed().as_millis() as u64;
        inner.log.entries.push(entry);
        inner.log.entries.len() - 1
    }

    pub fn record_answer(&self, entry: usize, answer: &str) {
        let mut inner = self.lock();
        if let Some(e) = inner.log.entries.get_mut(entry) {
            e.answers.push(answer.to_string());
        }
    }

    pub fn record_abort(&self, entry: usize) {
        let mut inner = self.lock();
        if let Some(e) = inner.log.entries.get_mut(entry) {
            e.aborted = true;
        }
    }

    /// Remembers the task an entry spawned so a cancellation that happens
    /// later still lands on that entry.
    pub fn track(&self, entry: usize, task: Arc<dyn TaskOutcome>) {
        self.lock().tasks.push((entry, task));
    }

    pub fn len(&self) -> usize {
        self.lock().log.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the log as recorded so far.
    pub fn log(&self) -> ReplayLog {
        let inner = self.lock();
        let mut log = inner.log.clone();
        for (entry, task) in &inner.tasks {
            if task.ended_cancelled()
                && let Some(e) = log.entries.get_mut(*entry)
            {
                e.cancelled = true;
            }
        }
        log
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        self.log().save(path)
    }
}

/// Passes questions through to the real input source and appends every
/// answer to one log entry. A dismissed prompt marks the entry aborted.
pub struct RecordingPrompter {
    recorder: Recorder,
    entry: usize,
    inner: Arc<dyn Prompter>,
}

impl RecordingPrompter {
    pub fn new(recorder: Recorder, entry: usize, inner: Arc<dyn Prompter>) -> Self {
        Self {
            recorder,
            entry,
            inner,
        }
    }
}

impl Prompter for RecordingPrompter {
    fn ask(&self, question: &Question) -> Result<String, PromptError> {
        match self.inner.ask(question) {
            Ok(answer) => {
                self.recorder.record_answer(self.entry, &answer);
                Ok(answer)
            }
            Err(e @ (PromptError::Aborted | PromptError::Unavailable)) => {
                self.recorder.record_abort(self.entry);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
