use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::Paragraph;

use crate::core::state::App;
use crate::sheet::{Sheet, TableSheet};
use crate::tui::TuiState;
use crate::tui::component::Component;
use crate::tui::components::{SheetView, StatusBar};

pub fn draw_ui(frame: &mut Frame, app: &App<TableSheet>, tui: &mut TuiState) {
    use Constraint::{Length, Min};

    let sheet = app.active_sheet();
    let (name, position) = match &sheet {
        Some(s) => {
            let rows = s.row_count();
            let row = if rows == 0 { 0 } else { s.cursor_position().row + 1 };
            (s.name(), format!("{row}/{rows}"))
        }
        None => ("-".to_string(), String::new()),
    };

    let mut status = StatusBar::new(&name, &position, app.snapshot());
    status.pending_keys = tui.pending_keys.as_ref().map(|k| k.to_string());
    status.replay = tui.replay_position;

    let prompt_height = if tui.prompt.is_some() { 1 } else { 0 };
    let layout = Layout::vertical([Min(0), Length(status.height()), Length(prompt_height)]);
    let [sheet_area, status_area, prompt_area] = layout.areas(frame.area());

    match &sheet {
        Some(sheet) => {
            let state = tui.views.entry(sheet.id()).or_default();
            sheet.read(|table| SheetView::new(state, table).render(frame, sheet_area));
        }
        None => {
            let empty = Paragraph::new("no open sheets")
                .style(Style::default().add_modifier(Modifier::DIM));
            frame.render_widget(empty, sheet_area);
        }
    }

    status.render(frame, status_area);

    if let Some(prompt) = tui.prompt.as_mut() {
        prompt.render(frame, prompt_area);
    }
}
