//! # SheetView Component
//!
//! Draws the active sheet as a grid: a header row, then as many rows and
//! columns as fit, scrolled so the cursor cell is always on screen.
//!
//! Created fresh each frame with a borrowed `Table` snapshot and the
//! persistent `SheetViewState` (scroll offsets) of that sheet.

use std::ops::Range;

use ratatui::Frame;
use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Cell, Row as GridRow, Table as Grid};
use unicode_width::UnicodeWidthStr;

use crate::sheet::Table;
use crate::tui::component::Component;

pub const MAX_COLUMN_WIDTH: u16 = 32;
const COLUMN_SPACING: u16 = 1;

/// Scroll position of one sheet. Kept by the event loop per sheet id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SheetViewState {
    /// First row drawn
    pub top: usize,
    /// First column drawn
    pub left: usize,
}

impl SheetViewState {
    fn follow_row(&mut self, cursor: usize, visible: usize) {
        if cursor < self.top {
            self.top = cursor;
        } else if visible > 0 && cursor >= self.top + visible {
            self.top = cursor + 1 - visible;
        }
    }

    fn follow_col(&mut self, cursor: usize, widths: &[u16], room: u16) {
        if cursor < self.left {
            self.left = cursor;
        }
        while self.left < cursor && span(&widths[self.left..=cursor]) > room {
            self.left += 1;
        }
    }
}

fn span(widths: &[u16]) -> u16 {
    let gaps = widths.len().saturating_sub(1) as u16 * COLUMN_SPACING;
    widths.iter().sum::<u16>() + gaps
}

fn column_widths(table: &Table, rows: Range<usize>) -> Vec<u16> {
    (0..table.n_cols())
        .map(|col| {
            let header = table.columns.get(col).map_or(0, |c| c.width());
            let cells = table.rows[rows.clone()]
                .iter()
                .map(|r| r.cell(col).width())
                .max()
                .unwrap_or(0);
            (header.max(cells) as u16).clamp(1, MAX_COLUMN_WIDTH)
        })
        .collect()
}

pub struct SheetView<'a> {
    pub state: &'a mut SheetViewState,
    pub table: &'a Table,
}

impl<'a> SheetView<'a> {
    pub fn new(state: &'a mut SheetViewState, table: &'a Table) -> Self {
        Self { state, table }
    }
}

impl<'a> Component for SheetView<'a> {
    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let table = self.table;
        let cursor = table.cursor;
        let body_height = area.height.saturating_sub(1) as usize;

        self.state.follow_row(cursor.row, body_height);
        self.state.top = self.state.top.min(table.rows.len());
        let rows = self.state.top..(self.state.top + body_height).min(table.rows.len());

        let widths = column_widths(table, rows.clone());
        if widths.is_empty() {
            return;
        }
        let cursor_col = cursor.col.min(widths.len() - 1);
        self.state.follow_col(cursor_col, &widths, area.width);

        let mut shown = Vec::new();
        let mut used = 0u16;
        for (col, &w) in widths.iter().enumerate().skip(self.state.left) {
            let needed = if shown.is_empty() { w } else { w + COLUMN_SPACING };
            if !shown.is_empty() && used + needed > area.width {
                break;
            }
            used += needed;
            shown.push(col);
        }

        let header = GridRow::new(
            shown
                .iter()
                .map(|&col| Cell::from(table.columns.get(col).cloned().unwrap_or_default())),
        )
        .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));

        let body = rows.map(|idx| {
            let row = &table.rows[idx];
            let cells = shown.iter().map(|&col| {
                let cell = Cell::from(row.cell(col).to_string());
                if idx == cursor.row && col == cursor_col {
                    cell.style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    cell
                }
            });
            let style = if row.selected {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            GridRow::new(cells).style(style)
        });

        let constraints = shown.iter().map(|&col| Constraint::Length(widths[col]));
        let grid = Grid::new(body, constraints)
            .header(header)
            .column_spacing(COLUMN_SPACING);
        frame.render_widget(grid, area);
    }
}
