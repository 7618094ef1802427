//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::core::command::CommandEnv;
use crate::core::config::ResolvedConfig;
use crate::core::registry::CommandRegistry;
use crate::core::status::StatusAggregator;
use crate::core::task_manager::TaskManager;
use crate::sheet::{TableSheet, Workspace};

/// A table sheet with one column per cell of the first row, named `c0..`.
pub fn table_sheet(name: &str, rows: &[&[&str]]) -> Arc<TableSheet> {
    let width = rows.first().map_or(1, |r| r.len());
    let columns = (0..width).map(|i| format!("c{i}")).collect();
    let rows = rows
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect();
    Arc::new(TableSheet::with_table(name, "table", crate::sheet::Table::new(columns, rows)))
}

/// A fresh, empty engine environment on the current tokio runtime.
pub fn test_env() -> CommandEnv<TableSheet> {
    CommandEnv {
        workspace: Workspace::default(),
        status: StatusAggregator::default(),
        tasks: Arc::new(TaskManager::new(Handle::current())),
        registry: Arc::new(CommandRegistry::new()),
        config: Arc::new(ResolvedConfig::default()),
    }
}

/// Spins until `cond` holds; panics after a few seconds.
pub fn wait_for(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}
