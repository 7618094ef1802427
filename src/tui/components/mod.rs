//! # TUI Components
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ SheetView                    │  active sheet, scrolled to the cursor
//! │                              │
//! ├──────────────────────────────┤
//! │ StatusBar                    │  visible messages, then the bar line
//! ├──────────────────────────────┤
//! │ PromptLine                   │  only while a command waits for input
//! └──────────────────────────────┘
//! ```
//!
//! `StatusBar` is stateless: it renders the props it is given. `SheetView`
//! borrows its scroll state from the event loop for one frame. `PromptLine`
//! owns its edit buffer and reports back through `EventHandler`.

mod prompt_line;
mod sheet_view;
mod status_bar;

pub use prompt_line::{PromptEvent, PromptLine};
pub use sheet_view::{SheetView, SheetViewState};
pub use status_bar::StatusBar;
