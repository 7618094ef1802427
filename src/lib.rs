//! Sheetdeck library exports for the binary and for testing

pub mod core;
pub mod sheet;
pub mod tui;

#[cfg(test)]
pub mod test_support;
