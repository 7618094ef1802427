//! # PromptLine Component
//!
//! The one-line input shown while a command waits for an answer. The
//! question is a prop; the typed text and the cursor are internal state.
//!
//! Keys arrive as `KeyToken` names. Anything the edit-mode bindings claim
//! (e.g. `Ctrl+O`) is dispatched by the event loop before it gets here.

use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::tui::component::{Component, EventHandler};
use crate::tui::event::TuiEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    Submit(String),
    Abort,
    Changed,
}

#[derive(Debug, Default)]
pub struct PromptLine {
    /// Question text (Prop)
    pub question: String,
    buffer: String,
    /// Byte offset into `buffer`
    cursor: usize,
}

impl PromptLine {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Replaces the text and puts the cursor at the end.
    pub fn set_text(&mut self, text: &str) {
        self.buffer = text.replace(['\n', '\r'], " ");
        self.cursor = self.buffer.len();
    }

    fn insert(&mut self, text: &str) {
        self.buffer.insert_str(self.cursor, text);
        self.cursor += text.len();
    }

    fn prev_boundary(&self) -> usize {
        self.buffer[..self.cursor]
            .char_indices()
            .next_back()
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn next_boundary(&self) -> usize {
        self.buffer[self.cursor..]
            .chars()
            .next()
            .map(|c| self.cursor + c.len_utf8())
            .unwrap_or(self.buffer.len())
    }

    fn delete_word_back(&mut self) {
        let head = &self.buffer[..self.cursor];
        let trimmed = head.trim_end();
        let start = trimmed
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.buffer.drain(start..self.cursor);
        self.cursor = start;
    }

    /// Text to draw and the cursor column within it, scrolled so the
    /// cursor stays inside `width` columns.
    fn visible(&self, width: usize) -> (String, usize) {
        let before = &self.buffer[..self.cursor];
        let mut skip = 0;
        let mut col = before.width();
        if width > 0 && col >= width {
            for c in before.chars() {
                if col < width {
                    break;
                }
                col -= c.width().unwrap_or(0);
                skip += c.len_utf8();
            }
        }
        let mut shown = String::new();
        let mut used = 0;
        for c in self.buffer[skip..].chars() {
            let w = c.width().unwrap_or(0);
            if used + w > width {
                break;
            }
            used += w;
            shown.push(c);
        }
        (shown, col)
    }
}

impl Component for PromptLine {
    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let label_width = self.question.width() as u16;
        let room = area.width.saturating_sub(label_width).saturating_sub(1) as usize;
        let (shown, col) = self.visible(room);
        let line = Line::from(vec![
            Span::styled(self.question.clone(), Style::default().fg(Color::Yellow)),
            Span::raw(shown),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        frame.set_cursor_position((area.x + label_width + col as u16, area.y));
    }
}

impl EventHandler for PromptLine {
    type Event = PromptEvent;

    fn handle_event(&mut self, event: &TuiEvent) -> Option<Self::Event> {
        let key = match event {
            TuiEvent::Paste(text) => {
                self.insert(&text.replace(['\n', '\r'], " "));
                return Some(PromptEvent::Changed);
            }
            TuiEvent::Resize => return None,
            TuiEvent::Key(key) => key.as_str(),
        };
        match key {
            "Enter" => {
                self.cursor = 0;
                Some(PromptEvent::Submit(std::mem::take(&mut self.buffer)))
            }
            "Esc" => Some(PromptEvent::Abort),
            "Space" => {
                self.insert(" ");
                Some(PromptEvent::Changed)
            }
            "Backspace" if self.cursor > 0 => {
                let prev = self.prev_boundary();
                self.buffer.drain(prev..self.cursor);
                self.cursor = prev;
                Some(PromptEvent::Changed)
            }
            "Delete" if self.cursor < self.buffer.len() => {
                let next = self.next_boundary();
                self.buffer.drain(self.cursor..next);
                Some(PromptEvent::Changed)
            }
            "Left" => {
                self.cursor = self.prev_boundary();
                None
            }
            "Right" => {
                self.cursor = self.next_boundary();
                None
            }
            "Home" | "Ctrl+A" => {
                self.cursor = 0;
                None
            }
            "End" | "Ctrl+E" => {
                self.cursor = self.buffer.len();
                None
            }
            "Ctrl+U" => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                Some(PromptEvent::Changed)
            }
            "Ctrl+W" => {
                self.delete_word_back();
                Some(PromptEvent::Changed)
            }
            // Any other single character is literal text.
            other if other.chars().count() == 1 => {
                self.insert(other);
                Some(PromptEvent::Changed)
            }
            _ => None,
        }
    }
}
