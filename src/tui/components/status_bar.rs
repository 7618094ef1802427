//! # StatusBar Component
//!
//! Bottom region: the visible status messages above one bar line that names
//! the active sheet and shows every live task with its progress.
//!
//! Stateless. Everything comes in as props, usually straight from
//! `App::snapshot()`, so a test can render any state it likes:
//!
//! ```rust,ignore
//! let mut bar = StatusBar::new("orders", "3/120", app.snapshot());
//! bar.render(frame, area);
//! ```

use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use unicode_width::UnicodeWidthStr;

use crate::core::status::{RenderedProgress, Severity, StatusSnapshot, TaskView};
use crate::tui::component::Component;

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Message lines shown at most; older visible messages stay in the history.
pub const MAX_MESSAGE_LINES: usize = 3;

pub struct StatusBar {
    pub sheet: String,
    /// Cursor position within the sheet, e.g. `"3/120"`.
    pub position: String,
    /// Keys of an unfinished chord, e.g. `"g"`.
    pub pending_keys: Option<String>,
    /// Replay position and length while a replay is running.
    pub replay: Option<(usize, usize)>,
    pub snapshot: StatusSnapshot,
}

impl StatusBar {
    pub fn new(sheet: &str, position: &str, snapshot: StatusSnapshot) -> Self {
        Self {
            sheet: sheet.to_string(),
            position: position.to_string(),
            pending_keys: None,
            replay: None,
            snapshot,
        }
    }

    /// Rows this component wants: one per shown message plus the bar.
    pub fn height(&self) -> u16 {
        (self.snapshot.messages.len().min(MAX_MESSAGE_LINES) + 1) as u16
    }

    fn left_text(&self) -> String {
        let mut text = format!(" {} {}", self.sheet, self.position);
        if let Some(keys) = &self.pending_keys {
            text.push_str(&format!("  [{keys} …]"));
        }
        if let Some((position, len)) = self.replay {
            text.push_str(&format!("  replay {position}/{len}"));
        }
        if self.snapshot.paused_all {
            text.push_str("  PAUSED");
        }
        text
    }

    fn right_text(&self) -> String {
        let tasks: Vec<String> = self.snapshot.tasks.iter().map(task_text).collect();
        if tasks.is_empty() {
            String::new()
        } else {
            format!("{} ", tasks.join(" | "))
        }
    }
}

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Info => Style::default(),
        Severity::Warning => Style::default().fg(Color::Yellow),
        Severity::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

/// One task as shown on the bar: `sort-asc 45% 1.2s`, or a spinner and a
/// count when the total is unknown.
pub fn task_text(task: &TaskView) -> String {
    let progress = match &task.progress {
        RenderedProgress::Determinate { percent, .. } => format!("{percent}%"),
        RenderedProgress::Indeterminate { completed, frame } => {
            let spin = SPINNER[(*frame as usize) % SPINNER.len()];
            format!("{spin} {completed}")
        }
    };
    let mut text = format!("{} {} {:.1}s", task.label, progress, task.elapsed.as_secs_f64());
    if task.paused {
        text.push_str(" (paused)");
    }
    text
}

impl Component for StatusBar {
    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let shown = self.snapshot.messages.len().min(MAX_MESSAGE_LINES);
        let [messages_area, bar_area] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(area);

        // Oldest on top so the newest sits right above the bar.
        let lines: Vec<Line> = self.snapshot.messages[..shown]
            .iter()
            .rev()
            .map(|m| Line::from(Span::styled(m.text.clone(), severity_style(m.severity))))
            .collect();
        frame.render_widget(Paragraph::new(lines), messages_area);

        let right = self.right_text();
        let [left_area, right_area] = Layout::horizontal([
            Constraint::Min(0),
            Constraint::Length(right.width() as u16),
        ])
        .areas(bar_area);
        let bar_style = Style::default().add_modifier(Modifier::REVERSED);
        frame.render_widget(Paragraph::new(self.left_text()).style(bar_style), left_area);
        frame.render_widget(Paragraph::new(right).style(bar_style), right_area);
    }
}
