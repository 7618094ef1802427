use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use log::{debug, warn};

use crate::core::registry::KeyToken;

/// Terminal input, already reduced to what the adapter acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuiEvent {
    Key(KeyToken),
    /// Bracketed paste; only meaningful while the prompt line is open.
    Paste(String),
    Resize,
}

/// Poll for an event without blocking (returns immediately)
pub fn poll_event_immediate() -> Option<TuiEvent> {
    poll_event_timeout(Duration::ZERO)
}

/// Poll for an event, blocking up to `timeout`.
pub fn poll_event_timeout(timeout: Duration) -> Option<TuiEvent> {
    match event::poll(timeout) {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            warn!("Event poll failed: {}", e);
            return None;
        }
    }
    match event::read() {
        Ok(Event::Key(key_event)) => {
            debug!("Key event: {:?} with modifiers {:?}", key_event.code, key_event.modifiers);
            key_token(&key_event).map(TuiEvent::Key)
        }
        Ok(Event::Paste(data)) => Some(TuiEvent::Paste(data)),
        Ok(Event::Resize(_, _)) => Some(TuiEvent::Resize),
        Ok(_) => None,
        Err(e) => {
            warn!("Event read failed: {}", e);
            None
        }
    }
}

/// Names a key press the way bindings spell it: `"j"`, `"G"`, `"Space"`,
/// `"Ctrl+R"`, `"Alt+x"`, `"F1"`, `"Enter"`. Releases are dropped.
pub fn key_token(key: &KeyEvent) -> Option<KeyToken> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let base = match key.code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) if ctrl => c.to_ascii_uppercase().to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::F(n) => format!("F{n}"),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Esc => "Esc".to_string(),
        KeyCode::Backspace => "Backspace".to_string(),
        KeyCode::Delete => "Delete".to_string(),
        KeyCode::Insert => "Insert".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::BackTab => "BackTab".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::PageUp => "PageUp".to_string(),
        KeyCode::PageDown => "PageDown".to_string(),
        _ => return None,
    };

    let mut name = String::new();
    if ctrl {
        name.push_str("Ctrl+");
    }
    if alt {
        name.push_str("Alt+");
    }
    name.push_str(&base);
    Some(KeyToken::new(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> Option<String> {
        let key = KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        };
        key_token(&key).map(|t| t.as_str().to_string())
    }

    #[test]
    fn test_plain_and_shifted_chars() {
        assert_eq!(press(KeyCode::Char('j'), KeyModifiers::NONE).as_deref(), Some("j"));
        assert_eq!(press(KeyCode::Char('G'), KeyModifiers::SHIFT).as_deref(), Some("G"));
        assert_eq!(press(KeyCode::Char('|'), KeyModifiers::SHIFT).as_deref(), Some("|"));
        assert_eq!(press(KeyCode::Char(' '), KeyModifiers::NONE).as_deref(), Some("Space"));
    }

    #[test]
    fn test_control_chords_are_uppercased() {
        assert_eq!(press(KeyCode::Char('r'), KeyModifiers::CONTROL).as_deref(), Some("Ctrl+R"));
        assert_eq!(press(KeyCode::Up, KeyModifiers::CONTROL).as_deref(), Some("Ctrl+Up"));
        assert_eq!(press(KeyCode::Char('x'), KeyModifiers::ALT).as_deref(), Some("Alt+x"));
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(press(KeyCode::F(1), KeyModifiers::NONE).as_deref(), Some("F1"));
        assert_eq!(press(KeyCode::Enter, KeyModifiers::NONE).as_deref(), Some("Enter"));
        assert_eq!(press(KeyCode::Esc, KeyModifiers::NONE).as_deref(), Some("Esc"));
        assert_eq!(press(KeyCode::Home, KeyModifiers::NONE).as_deref(), Some("Home"));
    }

    #[test]
    fn test_release_is_ignored() {
        let key = KeyEvent {
            code: KeyCode::Char('j'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert!(key_token(&key).is_none());
    }
}
