//! # Sheets
//!
//! The engine in `core` never looks inside a sheet. It only needs the small
//! contract below: an identity, a name, a type (for per-type command
//! overrides), a row count and a cursor. Everything about row storage belongs
//! to the concrete sheet.
//!
//! ```text
//! Workspace (stack, top = active)
//! ├── TableSheet "a"        ← active
//! ├── TableSheet "commands"
//! └── ...
//! ```
//!
//! ## Modules
//!
//! - [`table`]: `TableSheet`, an in-memory table of strings
//! - [`loader`]: reads delimited text files into a `Table`
//! - [`commands`]: the built-in command set for table sheets

pub mod commands;
pub mod loader;
pub mod table;

pub use table::{Row, Table, TableSheet};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Stable identity of a sheet for the lifetime of the process.
pub type SheetId = u64;

static NEXT_SHEET_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh, never reused sheet id.
pub fn next_sheet_id() -> SheetId {
    NEXT_SHEET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Cursor position as (row, column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

/// What the command engine consumes from a sheet.
///
/// Implementations must be safe to share between the main context and any
/// number of task workers. Row mutation goes through the concrete type's own
/// entry point; the engine does not serialize it.
pub trait Sheet: Send + Sync + 'static {
    fn id(&self) -> SheetId;
    fn name(&self) -> String;
    /// Type name used for per-type command and binding overrides.
    fn sheet_type(&self) -> &str;
    fn row_count(&self) -> usize;
    fn cursor_position(&self) -> Cursor;
}

/// The stack of open sheets. Cloning shares the same stack.
pub struct Workspace<S: Sheet> {
    stack: Arc<Mutex<Vec<Arc<S>>>>,
}

impl<S: Sheet> Clone for Workspace<S> {
    fn clone(&self) -> Self {
        Self {
            stack: Arc::clone(&self.stack),
        }
    }
}

impl<S: Sheet> Default for Workspace<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Sheet> Workspace<S> {
    pub fn new() -> Self {
        Self {
            stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<S>>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes a sheet on top, moving it there if it is already open.
    pub fn push(&self, sheet: Arc<S>) {
        let mut stack = self.lock();
        stack.retain(|s| s.id() != sheet.id());
        stack.push(sheet);
    }

    /// The active sheet.
    pub fn top(&self) -> Option<Arc<S>> {
        self.lock().last().cloned()
    }

    pub fn get(&self, id: SheetId) -> Option<Arc<S>> {
        self.lock().iter().find(|s| s.id() == id).cloned()
    }

    pub fn remove(&self, id: SheetId) -> Option<Arc<S>> {
        let mut stack = self.lock();
        let idx = stack.iter().position(|s| s.id() == id)?;
        Some(stack.remove(idx))
    }

    /// Moves the active sheet to the bottom of the stack (`forward`), or the
    /// bottom sheet to the top. Returns the new active sheet.
    pub fn cycle(&self, forward: bool) -> Option<Arc<S>> {
        let mut stack = self.lock();
        if stack.len() > 1 {
            if forward {
                let last = stack.len() - 1;
                let top = stack.remove(last);
                stack.insert(0, top);
            } else {
                let bottom = stack.remove(0);
                stack.push(bottom);
            }
        }
        stack.last().cloned()
    }

    /// Swaps the two topmost sheets. False when fewer than two are open.
    pub fn swap_top(&self) -> bool {
        let mut stack = self.lock();
        let n = stack.len();
        if n < 2 {
            return false;
        }
        stack.swap(n - 1, n - 2);
        true
    }

    /// All sheets, active sheet first.
    pub fn sheets(&self) -> Vec<Arc<S>> {
        self.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
