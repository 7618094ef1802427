use ratatui::Frame;
use ratatui::layout::Rect;

/// A piece of the screen.
///
/// Data the component only displays is passed in as struct fields (props).
/// Anything it owns across frames, such as a scroll offset or an edit
/// buffer, lives in the component itself, which is why `render` takes
/// `&mut self`.
pub trait Component {
    fn render(&mut self, frame: &mut Frame, area: Rect);
}

/// A component that consumes terminal events.
pub trait EventHandler {
    /// What the component reports back to the event loop.
    type Event;

    fn handle_event(&mut self, event: &super::event::TuiEvent) -> Option<Self::Event>;
}
