//! In-memory table sheet.
//!
//! All row data sits behind one `RwLock`. Command bodies read through
//! [`TableSheet::read`] and change data through [`TableSheet::mutate`], which
//! also keeps the cursor inside the table afterwards.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use super::{Cursor, Sheet, SheetId, next_sheet_id};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<String>,
    pub selected: bool,
}

impl Row {
    pub fn new(cells: Vec<String>) -> Self {
        Self {
            cells,
            selected: false,
        }
    }

    pub fn cell(&self, col: usize) -> &str {
        self.cells.get(col).map(String::as_str).unwrap_or("")
    }
}

/// Columns, rows and cursor. This is also the observable state compared by
/// replay tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub cursor: Cursor,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            columns,
            rows: rows.into_iter().map(Row::new).collect(),
            cursor: Cursor::default(),
        }
    }

    pub fn n_cols(&self) -> usize {
        self.columns
            .len()
            .max(self.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0))
    }

    pub fn cursor_row(&self) -> Option<&Row> {
        self.rows.get(self.cursor.row)
    }

    pub fn selected_count(&self) -> usize {
        self.rows.iter().filter(|r| r.selected).count()
    }

    fn clamp_cursor(&mut self) {
        self.cursor.row = self.cursor.row.min(self.rows.len().saturating_sub(1));
        self.cursor.col = self.cursor.col.min(self.n_cols().saturating_sub(1));
    }
}

pub struct TableSheet {
    id: SheetId,
    name: String,
    kind: String,
    source: Option<PathBuf>,
    data: RwLock<Table>,
    last_search: Mutex<Option<String>>,
}

impl TableSheet {
    pub fn new(name: &str, kind: &str) -> Self {
        Self::with_table(name, kind, Table::default())
    }

    pub fn with_table(name: &str, kind: &str, table: Table) -> Self {
        Self {
            id: next_sheet_id(),
            name: name.to_string(),
            kind: kind.to_string(),
            source: None,
            data: RwLock::new(table),
            last_search: Mutex::new(None),
        }
    }

    /// An empty sheet that will be filled from `path`.
    pub fn from_source(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut sheet = Self::new(&name, "table");
        sheet.source = Some(path.to_path_buf());
        sheet
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Table) -> R) -> R {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut guard);
        guard.clamp_cursor();
        result
    }

    pub fn snapshot(&self) -> Table {
        self.read(Table::clone)
    }

    /// Pattern of the most recent regex search on this sheet.
    pub fn last_search(&self) -> Option<String> {
        self.last_search
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_last_search(&self, pattern: &str) {
        *self.last_search.lock().unwrap_or_else(PoisonError::into_inner) = Some(pattern.to_string());
    }
}

impl Sheet for TableSheet {
    fn id(&self) -> SheetId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn sheet_type(&self) -> &str {
        &self.kind
    }

    fn row_count(&self) -> usize {
        self.read(|t| t.rows.len())
    }

    fn cursor_position(&self) -> Cursor {
        self.read(|t| t.cursor)
    }
}
