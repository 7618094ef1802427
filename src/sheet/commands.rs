//! Built-in commands for table sheets and their default key bindings.
//!
//! Movement, selection and sheet-stack commands are synchronous. Anything
//! that walks every row (sort, filter, bulk delete, loading) or asks a
//! question runs as a task and polls `ctx.checkpoint()` at least every
//! [`CHECKPOINT_EVERY`] rows.
//!
//! Row-rewriting tasks work on a copy and commit with a single `mutate` at
//! the end, so a cancelled task leaves the sheet exactly as it was. Edits
//! made to the same sheet while such a task runs are overwritten by its
//! commit. Tasks look their sheet up again after every prompt rather than
//! holding it.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use regex::{Regex, RegexBuilder};

use crate::core::action::Effect;
use crate::core::command::{Command, CommandContext, CommandError, ExecMode};
use crate::core::dispatch::{DispatchOutcome, Dispatcher, Invocation};
use crate::core::registry::{CommandRegistry, InputMode, Scope};
use crate::core::status::{Severity, StatusMessage};
use crate::core::task::Progress;
use crate::sheet::loader::{self, LoadError};
use crate::sheet::{Row, Sheet, SheetId, Table, TableSheet, Workspace};

pub const CHECKPOINT_EVERY: usize = 1000;

/// Rows moved by `page-down` / `page-up`. Fixed so a replay moves the same
/// distance whatever the terminal height.
pub const PAGE_ROWS: usize = 20;

pub const HELP_SHEET: &str = "commands";
pub const SHEETS_SHEET: &str = "sheets";
pub const EDIT_MODE: &str = "edit";

type Ctx = CommandContext<TableSheet>;

fn motion(name: &str, description: &str, step: fn(&mut Table)) -> Command<TableSheet> {
    Command::new(name, description, ExecMode::Sync, move |ctx: &mut Ctx, _: &[String]| {
        ctx.sheet()?.mutate(step);
        Ok(())
    })
}

fn sync(
    name: &str,
    description: &str,
    body: impl Fn(&mut Ctx, &[String]) -> Result<(), CommandError> + Send + Sync + 'static,
) -> Command<TableSheet> {
    Command::new(name, description, ExecMode::Sync, body)
}

fn task(
    name: &str,
    description: &str,
    body: impl Fn(&mut Ctx, &[String]) -> Result<(), CommandError> + Send + Sync + 'static,
) -> Command<TableSheet> {
    Command::new(name, description, ExecMode::Async, body)
}

fn global(registry: &CommandRegistry<TableSheet>, keys: &[&str], command: Command<TableSheet>) {
    for key in keys {
        registry.bind(Scope::Global, InputMode::Normal, *key, &command.name);
    }
    registry.register(Scope::Global, command);
}

fn for_type(registry: &CommandRegistry<TableSheet>, sheet_type: &str, key: &str, command: Command<TableSheet>) {
    registry.bind(Scope::SheetType(sheet_type.into()), InputMode::Normal, key, &command.name);
    registry.register(Scope::SheetType(sheet_type.into()), command);
}

/// Registers every built-in command and binds the default keys.
pub fn install(registry: &CommandRegistry<TableSheet>) {
    global(registry, &["j", "Down"], motion("go-down", "move down one row", |t| {
        t.cursor.row = (t.cursor.row + 1).min(t.rows.len().saturating_sub(1));
    }));
    global(registry, &["k", "Up"], motion("go-up", "move up one row", |t| {
        t.cursor.row = t.cursor.row.saturating_sub(1);
    }));
    global(registry, &["h", "Left"], motion("go-left", "move left one column", |t| {
        t.cursor.col = t.cursor.col.saturating_sub(1);
    }));
    global(registry, &["l", "Right"], motion("go-right", "move right one column", |t| {
        t.cursor.col += 1;
    }));
    global(registry, &["g k", "Home"], motion("go-top", "move to the first row", |t| {
        t.cursor.row = 0;
    }));
    global(registry, &["g j", "End"], motion("go-bottom", "move to the last row", |t| {
        t.cursor.row = t.rows.len().saturating_sub(1);
    }));
    global(registry, &["g h"], motion("go-leftmost", "move to the first column", |t| {
        t.cursor.col = 0;
    }));
    global(registry, &["g l"], motion("go-rightmost", "move to the last column", |t| {
        t.cursor.col = t.n_cols().saturating_sub(1);
    }));
    global(registry, &["PageDown"], motion("page-down", "move down one page", |t| {
        t.cursor.row += PAGE_ROWS;
    }));
    global(registry, &["PageUp"], motion("page-up", "move up one page", |t| {
        t.cursor.row = t.cursor.row.saturating_sub(PAGE_ROWS);
    }));
    global(registry, &["r"], task("goto-row", "move to a row number (from 0)", goto_row));
    global(registry, &["c"], task("goto-column", "move to a column by name or number", goto_column));

    global(registry, &["/"], task("search-forward", "search the current column for a regex", |ctx, args| {
        search(ctx, args, false)
    }));
    global(registry, &["?"], task("search-backward", "search the current column backward for a regex", |ctx, args| {
        search(ctx, args, true)
    }));
    global(registry, &["n"], sync("search-next", "go to the next match of the last search", |ctx, _| {
        search_again(ctx, false)
    }));
    global(registry, &["p"], sync("search-prev", "go to the previous match of the last search", |ctx, _| {
        search_again(ctx, true)
    }));

    global(registry, &["["], task("sort-asc", "sort rows by the current column, ascending", |ctx, args| {
        sort_rows(ctx, args, false)
    }));
    global(registry, &["]"], task("sort-desc", "sort rows by the current column, descending", |ctx, args| {
        sort_rows(ctx, args, true)
    }));
    global(registry, &["|"], task("filter-equal", "keep rows whose current column equals a value", filter_equal));

    global(registry, &["e"], task("edit-cell", "replace the value of the current cell", edit_cell));
    global(registry, &["d"], sync("delete-row", "delete the current row", |ctx, _| {
        let removed = ctx.sheet()?.mutate(|t| {
            let row = t.cursor.row;
            (row < t.rows.len()).then(|| t.rows.remove(row))
        });
        if removed.is_none() {
            ctx.warn("no row to delete");
        }
        Ok(())
    }));
    global(registry, &["s"], sync("select-row", "select the current row", |ctx, _| {
        set_cursor_selection(&*ctx.sheet()?, Some(true));
        Ok(())
    }));
    global(registry, &["u"], sync("unselect-row", "unselect the current row", |ctx, _| {
        set_cursor_selection(&*ctx.sheet()?, Some(false));
        Ok(())
    }));
    global(registry, &["Space"], sync("toggle-row", "toggle selection of the current row", |ctx, _| {
        set_cursor_selection(&*ctx.sheet()?, None);
        Ok(())
    }));
    global(registry, &["g s"], sync("select-all", "select every row", |ctx, _| {
        ctx.sheet()?.mutate(|t| t.rows.iter_mut().for_each(|r| r.selected = true));
        Ok(())
    }));
    global(registry, &["g u"], sync("unselect-all", "clear the selection", |ctx, _| {
        ctx.sheet()?.mutate(|t| t.rows.iter_mut().for_each(|r| r.selected = false));
        Ok(())
    }));
    global(registry, &["\\"], task("unselect-regex", "unselect rows whose current column matches a regex", unselect_matching));
    global(registry, &["g d"], task("delete-selected", "delete all selected rows after confirmation", delete_selected));

    global(registry, &["o"], task("open-file", "open a file as a new sheet", open_file));
    global(registry, &["Ctrl+R"], task("reload", "re-read the sheet from its source", reload));
    global(registry, &["Ctrl+S"], task("save-sheet", "write the sheet to a file", save_sheet));

    global(registry, &["q"], sync("close-sheet", "close the current sheet", |ctx, _| {
        let sheet = ctx.sheet()?;
        ctx.close_sheet(&sheet)?;
        if ctx.workspace().is_empty() {
            ctx.request(Effect::Quit);
        }
        Ok(())
    }));
    global(registry, &["g q"], sync("quit-all", "close every sheet and quit", |ctx, _| {
        for sheet in ctx.workspace().sheets() {
            ctx.close_sheet(&sheet)?;
        }
        ctx.request(Effect::Quit);
        Ok(())
    }));
    global(registry, &["S"], sync("sheets-sheet", "open the list of open sheets", |ctx, _| {
        let sheet = sheets_sheet(ctx.workspace());
        ctx.workspace().push(Arc::new(sheet));
        Ok(())
    }));
    global(registry, &["Tab"], sync("cycle-sheets", "move the current sheet to the bottom of the stack", |ctx, _| {
        ctx.workspace().cycle(true);
        Ok(())
    }));
    global(registry, &["BackTab"], sync("reverse-cycle-sheets", "bring the bottom sheet to the top", |ctx, _| {
        ctx.workspace().cycle(false);
        Ok(())
    }));
    global(registry, &["Ctrl+^", "Ctrl+6"], sync("swap-sheets", "go back to the previous sheet", |ctx, _| {
        if !ctx.workspace().swap_top() {
            ctx.warn("no previous sheet");
        }
        Ok(())
    }));
    for_type(registry, "sheets", "Enter", sync("jump-to-sheet", "go to the sheet under the cursor", jump_to_sheet));

    global(registry, &["Ctrl+G"], sync("sheet-info", "show the size of the current sheet", |ctx, _| {
        let sheet = ctx.sheet()?;
        let (rows, cols, selected) = sheet.read(|t| (t.rows.len(), t.n_cols(), t.selected_count()));
        ctx.post(format!(
            "{}: {} rows, {} columns, {} selected",
            sheet.name(),
            rows,
            cols,
            selected
        ));
        Ok(())
    }));
    global(registry, &["Ctrl+V"], sync("version", "show the version", |ctx, _| {
        ctx.post(format!("sheetdeck {}", env!("CARGO_PKG_VERSION")));
        Ok(())
    }));
    global(registry, &["Ctrl+P"], sync("status-history", "open the status message history", |ctx, _| {
        let sheet = history_sheet(&ctx.status().history());
        ctx.workspace().push(Arc::new(sheet));
        Ok(())
    }));
    global(registry, &["E"], sync("last-error", "open the most recent error message", |ctx, _| {
        match last_error_sheet(&ctx.status().history()) {
            Some(sheet) => ctx.workspace().push(Arc::new(sheet)),
            None => ctx.warn("no error yet"),
        }
        Ok(())
    }));
    global(registry, &["Ctrl+T"], sync("task-list", "open the list of tasks", |ctx, _| {
        let sheet = task_sheet(ctx);
        ctx.workspace().push(Arc::new(sheet));
        Ok(())
    }));
    global(registry, &["F1"], sync("help", "list the commands bound on this sheet", |ctx, _| {
        let current = ctx.sheet()?;
        let sheet = help_sheet(ctx.registry(), current.sheet_type(), current.id());
        ctx.workspace().push(Arc::new(sheet));
        Ok(())
    }));

    // On the task list, `d` cancels the task under the cursor instead.
    for_type(registry, "tasks", "d", sync("cancel-task", "cancel the task under the cursor", |ctx, _| {
        let id = ctx
            .sheet()?
            .read(|t| t.cursor_row().and_then(|r| r.cell(0).parse::<u64>().ok()));
        match id {
            Some(id) if ctx.tasks().cancel(id) => ctx.post(format!("cancelling task {id}")),
            Some(id) => ctx.warn(format!("task {id} is not running")),
            None => ctx.warn("no task here"),
        }
        Ok(())
    }));

    // Task controls work with a prompt open too. They are not recorded: a
    // cancellation is stored on the entry of the task it stopped.
    let edit = InputMode::custom(EDIT_MODE);
    let controls = [
        (
            "Ctrl+C",
            sync("cancel-newest", "cancel the newest running task on this sheet", |ctx, _| {
                let sheet = ctx.sheet()?;
                match ctx.tasks().newest_live(sheet.id()) {
                    Some(task) => {
                        ctx.tasks().cancel(task.id());
                        ctx.post(format!("cancelling {}", task.label()));
                    }
                    None => ctx.warn("no running task on this sheet"),
                }
                Ok(())
            }),
        ),
        (
            "Ctrl+Z",
            sync("toggle-pause", "pause or resume every task", |ctx, _| {
                if ctx.tasks().is_paused_all() {
                    ctx.tasks().resume_all();
                    ctx.post("resumed all tasks");
                } else {
                    ctx.tasks().pause_all();
                    ctx.post("paused all tasks");
                }
                Ok(())
            }),
        ),
        (
            "Ctrl+O",
            sync("edit-external", "edit the input line in $EDITOR", |ctx, _| {
                ctx.request(Effect::ExternalEditor);
                Ok(())
            }),
        ),
    ];
    for (key, command) in controls {
        let name = command.name.clone();
        registry.register(Scope::Global, command.unrecorded());
        if name != "edit-external" {
            registry.bind(Scope::Global, InputMode::Normal, key, &name);
        }
        registry.bind(Scope::Global, edit.clone(), key, &name);
    }
}

/// Installs the built-ins, makes the command list the first sheet and opens
/// `files` on it through the dispatcher one at a time, so a recording starts
/// the same way its replay does. Returns the first sheet.
pub fn start(dispatcher: &Dispatcher<TableSheet>, files: &[PathBuf]) -> Arc<TableSheet> {
    let env = dispatcher.env();
    install(&env.registry);
    let first = Arc::new(help_sheet(&env.registry, "table", 0));
    env.workspace.push(Arc::clone(&first));

    for path in files {
        let Some(open) = env.registry.command("open-file", first.sheet_type(), first.id()) else {
            warn!("open-file is not registered");
            break;
        };
        let outcome = dispatcher.dispatch(
            Invocation::new(open, Arc::clone(&first)).args(vec![path.display().to_string()]),
        );
        if let DispatchOutcome::Spawned(task) = outcome {
            env.tasks.join_all(first.id());
            info!("Startup open of {:?} finished: {}", path, task.status().label());
        }
    }
    first
}

fn set_cursor_selection(sheet: &TableSheet, selected: Option<bool>) {
    sheet.mutate(|t| {
        let row = t.cursor.row;
        if let Some(r) = t.rows.get_mut(row) {
            r.selected = selected.unwrap_or(!r.selected);
        }
    });
}

/// The first argument, or the answer to `question`.
fn arg_or_prompt(ctx: &Ctx, args: &[String], question: &str) -> Result<String, CommandError> {
    match args.first() {
        Some(arg) => Ok(arg.clone()),
        None => ctx.prompt(question),
    }
}

/// Column given by name or zero-based index, else the cursor column.
fn column_arg(table: &Table, args: &[String]) -> Result<usize, CommandError> {
    let Some(arg) = args.first() else {
        return Ok(table.cursor.col);
    };
    if let Some(idx) = table.columns.iter().position(|c| c == arg) {
        return Ok(idx);
    }
    match arg.parse::<usize>() {
        Ok(idx) if idx < table.n_cols() => Ok(idx),
        _ => Err(CommandError::InvalidArgs(format!("no column '{arg}'"))),
    }
}

/// Numbers compare numerically, everything else as text.
pub fn compare_cells(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn merge(left: Vec<Row>, right: Vec<Row>, out: &mut Vec<Row>, cmp: &impl Fn(&Row, &Row) -> Ordering) {
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        let next = if cmp(a, b) == Ordering::Greater {
            right.next()
        } else {
            left.next()
        };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
}

/// Stable bottom-up merge sort that checkpoints between runs and reports
/// merged rows as progress.
fn cooperative_sort(
    ctx: &Ctx,
    rows: Vec<Row>,
    cmp: impl Fn(&Row, &Row) -> Ordering,
) -> Result<Vec<Row>, CommandError> {
    let n = rows.len();
    let passes = if n < 2 {
        0
    } else {
        u64::from(usize::BITS - (n - 1).leading_zeros())
    };
    let total = n as u64 * passes;
    let mut done = 0u64;
    let mut since_checkpoint = 0usize;
    let mut current = rows;
    let mut width = 1;
    while width < n {
        let mut merged = Vec::with_capacity(n);
        let mut rest = current.into_iter();
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let left: Vec<Row> = rest.by_ref().take(mid - start).collect();
            let right: Vec<Row> = rest.by_ref().take(end - mid).collect();
            merge(left, right, &mut merged, &cmp);
            done += (end - start) as u64;
            since_checkpoint += end - start;
            if since_checkpoint >= CHECKPOINT_EVERY {
                since_checkpoint = 0;
                ctx.set_progress(done, Some(total));
                ctx.checkpoint()?;
            }
            start = end;
        }
        current = merged;
        width *= 2;
    }
    ctx.set_progress(total, Some(total));
    Ok(current)
}

fn sort_rows(ctx: &mut Ctx, args: &[String], descending: bool) -> Result<(), CommandError> {
    let (col, rows, column) = ctx.sheet()?.read(|t| {
        column_arg(t, args).map(|col| {
            let name = t.columns.get(col).cloned().unwrap_or_else(|| col.to_string());
            (col, t.rows.clone(), name)
        })
    })?;
    ctx.checkpoint()?;
    let sorted = cooperative_sort(ctx, rows, |a, b| {
        let ord = compare_cells(a.cell(col), b.cell(col));
        if descending { ord.reverse() } else { ord }
    })?;
    ctx.checkpoint()?;
    let count = sorted.len();
    ctx.sheet()?.mutate(|t| t.rows = sorted);
    ctx.post(format!(
        "sorted {} rows by {} ({})",
        count,
        column,
        if descending { "desc" } else { "asc" }
    ));
    Ok(())
}

fn filter_equal(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let (col, column) = ctx.sheet()?.read(|t| {
        column_arg(t, args).map(|col| (col, t.columns.get(col).cloned().unwrap_or_default()))
    })?;
    let value = ctx.prompt(&format!("{column} = "))?;
    let rows = ctx.sheet()?.read(|t| t.rows.clone());
    let total = rows.len() as u64;
    let mut kept = Vec::new();
    for (i, row) in rows.into_iter().enumerate() {
        if i % CHECKPOINT_EVERY == 0 {
            ctx.set_progress(i as u64, Some(total));
            ctx.checkpoint()?;
        }
        if row.cell(col) == value {
            kept.push(row);
        }
    }
    ctx.checkpoint()?;
    let count = kept.len();
    ctx.sheet()?.mutate(|t| t.rows = kept);
    ctx.post(format!("{count} of {total} rows have {column} = {value}"));
    Ok(())
}

fn delete_selected(ctx: &mut Ctx, _args: &[String]) -> Result<(), CommandError> {
    let selected = ctx.sheet()?.read(Table::selected_count);
    if selected == 0 {
        ctx.warn("no rows selected");
        return Ok(());
    }
    if !ctx.confirm(&format!("delete {selected} selected rows? (y/n) "))? {
        ctx.post("nothing deleted");
        return Ok(());
    }
    let rows = ctx.sheet()?.read(|t| t.rows.clone());
    let mut kept = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        if i % CHECKPOINT_EVERY == 0 {
            ctx.checkpoint()?;
        }
        if !row.selected {
            kept.push(row);
        }
    }
    ctx.checkpoint()?;
    ctx.sheet()?.mutate(|t| t.rows = kept);
    ctx.post(format!("deleted {selected} rows"));
    Ok(())
}

fn load_table(ctx: &Ctx, path: &Path) -> Result<Table, CommandError> {
    let header = ctx.config().csv_header;
    loader::load(path, header, |done, total| {
        ctx.set_progress(done, Some(total));
        ctx.checkpoint().is_ok()
    })
    .map_err(|e| match e {
        LoadError::Cancelled => CommandError::Cancelled,
        e => CommandError::failed(format!("{}: {}", path.display(), e)),
    })
}

fn open_file(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let path = match args.first() {
        Some(p) => p.clone(),
        None => ctx.prompt("open: ")?,
    };
    let path = PathBuf::from(path.trim());
    if path.as_os_str().is_empty() {
        return Err(CommandError::InvalidArgs("no file given".into()));
    }
    let table = load_table(ctx, &path)?;
    ctx.checkpoint()?;

    let sheet = TableSheet::from_source(&path);
    let rows = table.rows.len();
    sheet.mutate(|t| *t = table);
    info!("Opened {:?} as sheet '{}'", path, sheet.name());
    ctx.post(format!("opened {} ({} rows)", sheet.name(), rows));
    ctx.workspace().push(Arc::new(sheet));
    Ok(())
}

fn reload(ctx: &mut Ctx, _args: &[String]) -> Result<(), CommandError> {
    let Some(path) = ctx.sheet()?.source().map(|p| p.to_path_buf()) else {
        return Err(CommandError::failed("sheet has no source to reload"));
    };
    let table = load_table(ctx, &path)?;
    ctx.checkpoint()?;
    let rows = table.rows.len();
    ctx.sheet()?.mutate(|t| *t = table);
    ctx.post(format!("reloaded {} ({} rows)", ctx.sheet()?.name(), rows));
    Ok(())
}

fn save_sheet(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let answer = arg_or_prompt(ctx, args, "save to: ")?;
    let path = match answer.trim() {
        "" => ctx
            .sheet()?
            .source()
            .map(Path::to_path_buf)
            .ok_or_else(|| CommandError::InvalidArgs("no file given".into()))?,
        name => PathBuf::from(name),
    };
    ctx.checkpoint()?;
    let table = ctx.sheet()?.snapshot();
    loader::save(&table, &path).map_err(|e| CommandError::failed(format!("{}: {}", path.display(), e)))?;
    info!("Saved {} rows to {:?}", table.rows.len(), path);
    ctx.post(format!("saved {} rows to {}", table.rows.len(), path.display()));
    Ok(())
}

fn edit_cell(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let (row, col, column) = ctx
        .sheet()?
        .read(|t| {
            let col = t.cursor.col;
            let name = t.columns.get(col).cloned().unwrap_or_else(|| col.to_string());
            (t.cursor.row < t.rows.len()).then_some((t.cursor.row, col, name))
        })
        .ok_or_else(|| CommandError::InvalidArgs("no cell to edit".into()))?;
    let value = arg_or_prompt(ctx, args, &format!("{column}: "))?;
    ctx.checkpoint()?;
    let edited = ctx.sheet()?.mutate(|t| -> Option<()> {
        let cells = &mut t.rows.get_mut(row)?.cells;
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = value;
        Some(())
    });
    if edited.is_none() {
        return Err(CommandError::failed(format!("row {row} is gone")));
    }
    Ok(())
}

fn goto_row(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let answer = arg_or_prompt(ctx, args, "goto row number: ")?;
    let row = answer
        .trim()
        .parse::<usize>()
        .map_err(|_| CommandError::InvalidArgs(format!("not a row number: '{answer}'")))?;
    ctx.sheet()?.mutate(|t| t.cursor.row = row);
    Ok(())
}

fn goto_column(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let answer = arg_or_prompt(ctx, args, "goto column name: ")?;
    let name = [answer.trim().to_string()];
    ctx.sheet()?.mutate(|t| -> Result<(), CommandError> {
        t.cursor.col = column_arg(t, &name)?;
        Ok(())
    })
}

fn build_regex(pattern: &str) -> Result<Regex, CommandError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CommandError::InvalidArgs(format!("bad pattern: {e}")))
}

/// Row of the next cell in `col` matching `regex`, scanning away from the
/// cursor and wrapping around once. The flag is set when the scan wrapped.
fn find_row(table: &Table, regex: &Regex, col: usize, backward: bool) -> Option<(usize, bool)> {
    let n = table.rows.len();
    if n == 0 {
        return None;
    }
    let cursor = table.cursor.row.min(n - 1);
    let hit = |r: &usize| regex.is_match(table.rows[*r].cell(col));
    if backward {
        (0..cursor)
            .rev()
            .find(hit)
            .map(|r| (r, false))
            .or_else(|| (cursor..n).rev().find(hit).map(|r| (r, true)))
    } else {
        (cursor + 1..n)
            .find(hit)
            .map(|r| (r, false))
            .or_else(|| (0..=cursor).find(hit).map(|r| (r, true)))
    }
}

fn jump_to_match(ctx: &Ctx, regex: &Regex, backward: bool) -> Result<(), CommandError> {
    let found = ctx.sheet()?.mutate(|t| {
        let found = find_row(t, regex, t.cursor.col, backward);
        if let Some((row, _)) = found {
            t.cursor.row = row;
        }
        found
    });
    match found {
        Some((_, true)) => ctx.post("search wrapped"),
        Some(_) => {}
        None => ctx.warn(format!("no match for {}", regex.as_str())),
    }
    Ok(())
}

fn search(ctx: &mut Ctx, args: &[String], backward: bool) -> Result<(), CommandError> {
    let pattern = arg_or_prompt(ctx, args, if backward { "?" } else { "/" })?;
    let regex = build_regex(&pattern)?;
    ctx.checkpoint()?;
    ctx.sheet()?.set_last_search(&pattern);
    jump_to_match(ctx, &regex, backward)
}

fn search_again(ctx: &mut Ctx, backward: bool) -> Result<(), CommandError> {
    let Some(pattern) = ctx.sheet()?.last_search() else {
        return Err(CommandError::InvalidArgs("no previous search".into()));
    };
    jump_to_match(ctx, &build_regex(&pattern)?, backward)
}

fn unselect_matching(ctx: &mut Ctx, args: &[String]) -> Result<(), CommandError> {
    let pattern = arg_or_prompt(ctx, args, "\\")?;
    let regex = build_regex(&pattern)?;
    let (col, mut rows) = ctx.sheet()?.read(|t| (t.cursor.col, t.rows.clone()));
    let total = rows.len() as u64;
    let mut count = 0;
    for (i, row) in rows.iter_mut().enumerate() {
        if i % CHECKPOINT_EVERY == 0 {
            ctx.set_progress(i as u64, Some(total));
            ctx.checkpoint()?;
        }
        if row.selected && regex.is_match(row.cell(col)) {
            row.selected = false;
            count += 1;
        }
    }
    ctx.checkpoint()?;
    ctx.sheet()?.mutate(|t| t.rows = rows);
    ctx.post(format!("unselected {count} rows"));
    Ok(())
}

/// Row `i` of the sheets list names the sheet `i` places below it. Falls
/// back to the first sheet with that name if the stack moved since.
fn jump_to_sheet(ctx: &mut Ctx, _args: &[String]) -> Result<(), CommandError> {
    let list = ctx.sheet()?;
    let (index, name) = list
        .read(|t| t.cursor_row().map(|r| (t.cursor.row, r.cell(0).to_string())))
        .ok_or_else(|| CommandError::InvalidArgs("no sheet here".into()))?;
    let below: Vec<Arc<TableSheet>> = ctx
        .workspace()
        .sheets()
        .into_iter()
        .filter(|s| s.id() != list.id())
        .collect();
    let target = below
        .get(index)
        .filter(|s| s.name() == name)
        .or_else(|| below.iter().find(|s| s.name() == name))
        .cloned();
    let Some(target) = target else {
        ctx.warn(format!("sheet {name} is closed"));
        return Ok(());
    };
    ctx.close_sheet(&list)?;
    ctx.workspace().push(target);
    Ok(())
}

fn strings(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// The bound keys of both input modes with their command descriptions.
pub fn help_sheet(registry: &CommandRegistry<TableSheet>, sheet_type: &str, instance: SheetId) -> TableSheet {
    let mut rows = Vec::new();
    for mode in [InputMode::Normal, InputMode::custom(EDIT_MODE)] {
        for (key, name) in registry.bindings_for(&mode, sheet_type, instance) {
            let description = registry
                .command(&name, sheet_type, instance)
                .map(|c| c.description)
                .unwrap_or_default();
            rows.push(vec![
                mode.label().to_string(),
                key.to_string(),
                name,
                description,
            ]);
        }
    }
    TableSheet::with_table(
        HELP_SHEET,
        "help",
        Table::new(strings(&["mode", "key", "command", "description"]), rows),
    )
}

pub fn history_sheet(history: &[StatusMessage]) -> TableSheet {
    let rows = history
        .iter()
        .map(|m| {
            vec![
                m.tick.to_string(),
                m.posted_at.format("%H:%M:%S").to_string(),
                m.severity.label().to_string(),
                m.text.clone(),
            ]
        })
        .collect();
    TableSheet::with_table(
        "status_history",
        "status",
        Table::new(strings(&["tick", "time", "severity", "message"]), rows),
    )
}

/// The most recent error, one row per line.
pub fn last_error_sheet(history: &[StatusMessage]) -> Option<TableSheet> {
    let error = history.iter().find(|m| m.severity == Severity::Error)?;
    let rows = error.text.lines().map(|line| vec![line.to_string()]).collect();
    Some(TableSheet::with_table(
        "last_error",
        "text",
        Table::new(strings(&["text"]), rows),
    ))
}

/// One row per open sheet, active first.
pub fn sheets_sheet(workspace: &Workspace<TableSheet>) -> TableSheet {
    let rows = workspace
        .sheets()
        .iter()
        .map(|sheet| {
            vec![
                sheet.name(),
                sheet.sheet_type().to_string(),
                sheet.row_count().to_string(),
                sheet.read(Table::n_cols).to_string(),
                sheet
                    .source()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    TableSheet::with_table(
        SHEETS_SHEET,
        "sheets",
        Table::new(strings(&["name", "type", "rows", "columns", "source"]), rows),
    )
}

fn progress_cell(progress: Progress) -> String {
    match progress.total {
        Some(total) => format!("{}/{}", progress.completed, total),
        None => progress.completed.to_string(),
    }
}

pub fn task_sheet(ctx: &Ctx) -> TableSheet {
    let rows = ctx
        .tasks()
        .all()
        .iter()
        .map(|task| {
            let sheet = ctx
                .workspace()
                .get(task.sheet_id())
                .map(|s| s.name())
                .unwrap_or_else(|| "-".to_string());
            let status = if task.is_paused() || ctx.tasks().is_paused_all() {
                format!("{} (paused)", task.status().label())
            } else {
                task.status().label().to_string()
            };
            vec![
                task.id().to_string(),
                task.command().to_string(),
                sheet,
                status,
                progress_cell(task.progress()),
                format!("{:.1}s", task.elapsed().as_secs_f64()),
                task.created_at().format("%H:%M:%S").to_string(),
            ]
        })
        .collect();
    TableSheet::with_table(
        "tasks",
        "tasks",
        Table::new(
            strings(&["id", "command", "sheet", "status", "progress", "elapsed", "started"]),
            rows,
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::ScriptedPrompter;
    use crate::core::task::TaskStatus;
    use crate::test_support::{table_sheet, test_env};

    fn dispatcher(rows: &[&[&str]]) -> (Dispatcher<TableSheet>, Arc<TableSheet>) {
        let env = test_env();
        install(&env.registry);
        let sheet = table_sheet("a", rows);
        env.workspace.push(Arc::clone(&sheet));
        (Dispatcher::new(env), sheet)
    }

    fn run(d: &Dispatcher<TableSheet>, name: &str, args: &[&str], answers: &[&str]) -> DispatchOutcome<TableSheet> {
        let sheet = d.env().workspace.top().unwrap();
        let cmd = d
            .env()
            .registry
            .command(name, sheet.sheet_type(), sheet.id())
            .unwrap();
        let prompter = Arc::new(ScriptedPrompter::new(answers.iter().map(|a| a.to_string()).collect()));
        let outcome = d.dispatch(
            Invocation::new(cmd, Arc::clone(&sheet))
                .args(args.iter().map(|a| a.to_string()).collect())
                .prompter(prompter),
        );
        d.env().tasks.join_all(sheet.id());
        outcome
    }

    fn column(sheet: &TableSheet, col: usize) -> Vec<String> {
        sheet.read(|t| t.rows.iter().map(|r| r.cell(col).to_string()).collect())
    }

    #[test]
    fn test_compare_cells_numeric_then_text() {
        assert_eq!(compare_cells("10", "9"), Ordering::Greater);
        assert_eq!(compare_cells("b", "a"), Ordering::Greater);
        assert_eq!(compare_cells(" 2", "2.0"), Ordering::Equal);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sort_asc_and_desc_by_arg() {
        let (d, sheet) = dispatcher(&[&["x", "3"], &["y", "10"], &["z", "1"]]);
        run(&d, "sort-asc", &["1"], &[]);
        assert_eq!(column(&sheet, 1), vec!["1", "3", "10"]);
        run(&d, "sort-desc", &["c0"], &[]);
        assert_eq!(column(&sheet, 0), vec!["z", "y", "x"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sort_is_stable_on_large_input() {
        let rows: Vec<Vec<String>> = (0..2500)
            .map(|i| vec![(i % 3).to_string(), i.to_string()])
            .collect();
        let refs: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
        let slices: Vec<&[&str]> = refs.iter().map(Vec::as_slice).collect();
        let (d, sheet) = dispatcher(&slices);
        run(&d, "sort-asc", &["0"], &[]);
        let keys = column(&sheet, 0);
        let seq: Vec<u32> = column(&sheet, 1).iter().map(|s| s.parse().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        for w in seq.windows(2).zip(keys.windows(2)) {
            if w.1[0] == w.1[1] {
                assert!(w.0[0] < w.0[1]);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sort_with_bad_column_fails_task() {
        let (d, sheet) = dispatcher(&[&["x"]]);
        let outcome = run(&d, "sort-asc", &["nope"], &[]);
        let DispatchOutcome::Spawned(task) = outcome else {
            panic!("expected a task");
        };
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(column(&sheet, 0), vec!["x"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_filter_equal_keeps_matching_rows() {
        let (d, sheet) = dispatcher(&[&["x", "1"], &["y", "2"], &["x", "3"]]);
        run(&d, "filter-equal", &[], &["x"]);
        assert_eq!(column(&sheet, 1), vec!["1", "3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_filter_without_answer_leaves_rows() {
        let (d, sheet) = dispatcher(&[&["x"], &["y"]]);
        let DispatchOutcome::Spawned(task) = run(&d, "filter-equal", &[], &[]) else {
            panic!("expected a task");
        };
        assert!(task.error().is_some_and(|e| e.is_answers_exhausted()));
        assert_eq!(sheet.row_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_selection_and_delete_selected() {
        let (d, sheet) = dispatcher(&[&["a"], &["b"], &["c"]]);
        run(&d, "select-row", &[], &[]);
        run(&d, "go-bottom", &[], &[]);
        run(&d, "toggle-row", &[], &[]);
        assert_eq!(sheet.read(Table::selected_count), 2);

        run(&d, "delete-selected", &[], &["n"]);
        assert_eq!(sheet.row_count(), 3);
        run(&d, "delete-selected", &[], &["yes"]);
        assert_eq!(column(&sheet, 0), vec!["b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_movement_stays_in_bounds() {
        let (d, sheet) = dispatcher(&[&["a", "1"], &["b", "2"]]);
        run(&d, "go-up", &[], &[]);
        run(&d, "go-left", &[], &[]);
        assert_eq!(sheet.cursor_position(), crate::sheet::Cursor { row: 0, col: 0 });
        for _ in 0..5 {
            run(&d, "go-down", &[], &[]);
            run(&d, "go-right", &[], &[]);
        }
        assert_eq!(sheet.cursor_position(), crate::sheet::Cursor { row: 1, col: 1 });
        run(&d, "go-top", &[], &[]);
        run(&d, "go-leftmost", &[], &[]);
        assert_eq!(sheet.cursor_position(), crate::sheet::Cursor::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_pushes_sheet() {
        let path = std::env::temp_dir().join(format!("sheetdeck-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, "k,v\na,1\nb,2\n").unwrap();
        let (d, _sheet) = dispatcher(&[&["x"]]);
        run(&d, "open-file", &[path.to_str().unwrap()], &[]);
        let top = d.env().workspace.top().unwrap();
        assert_eq!(top.name(), path.file_stem().unwrap().to_string_lossy());
        assert_eq!(top.row_count(), 2);
        assert_eq!(d.env().workspace.len(), 2);

        std::fs::write(&path, "k,v\na,1\n").unwrap();
        run(&d, "reload", &[], &[]);
        assert_eq!(top.row_count(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_last_sheet_requests_quit() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        let outcome = run(&d, "close-sheet", &[], &[]);
        assert!(matches!(outcome, DispatchOutcome::Completed(e) if e == vec![Effect::Quit]));
        assert!(d.env().workspace.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_help_lists_bindings_with_descriptions() {
        let (d, sheet) = dispatcher(&[&["x"]]);
        let help = help_sheet(&d.env().registry, sheet.sheet_type(), sheet.id());
        assert_eq!(help.name(), HELP_SHEET);
        let has = |key: &str, name: &str| {
            help.read(|t| t.rows.iter().any(|r| r.cell(1) == key && r.cell(2) == name))
        };
        assert!(has("g j", "go-bottom"));
        assert!(has("Ctrl+O", "edit-external"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_task_sheet_overrides_delete_key() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        run(&d, "task-list", &[], &[]);
        let (cmd, _) = d.resolve(&"d".into(), &InputMode::Normal).unwrap();
        assert_eq!(cmd.name, "cancel-task");
    }

    fn names(d: &Dispatcher<TableSheet>) -> Vec<String> {
        d.env().workspace.sheets().iter().map(|s| s.name()).collect()
    }

    fn history_has(d: &Dispatcher<TableSheet>, text: &str) -> bool {
        d.env().status.history().iter().any(|m| m.text == text)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_is_case_insensitive_and_wraps() {
        let (d, sheet) = dispatcher(&[&["apple"], &["Banana"], &["cherry"], &["banana split"]]);
        run(&d, "search-forward", &[], &["^ban"]);
        assert_eq!(sheet.cursor_position().row, 1);
        assert_eq!(sheet.last_search().as_deref(), Some("^ban"));
        run(&d, "search-next", &[], &[]);
        assert_eq!(sheet.cursor_position().row, 3);
        run(&d, "search-next", &[], &[]);
        assert_eq!(sheet.cursor_position().row, 1);
        assert!(history_has(&d, "search wrapped"));
        run(&d, "search-prev", &[], &[]);
        assert_eq!(sheet.cursor_position().row, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_backward_from_top_wraps_to_bottom() {
        let (d, sheet) = dispatcher(&[&["x1"], &["y"], &["x2"], &["y"]]);
        run(&d, "search-backward", &[], &["x"]);
        assert_eq!(sheet.cursor_position().row, 2);
        run(&d, "search-forward", &[], &["nothing"]);
        assert_eq!(sheet.cursor_position().row, 2);
        assert!(history_has(&d, "no match for nothing"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_errors() {
        let (d, sheet) = dispatcher(&[&["x"]]);
        let outcome = run(&d, "search-next", &[], &[]);
        assert!(matches!(outcome, DispatchOutcome::Failed(CommandError::InvalidArgs(_))));
        let DispatchOutcome::Spawned(task) = run(&d, "search-forward", &[], &["("]) else {
            panic!("expected a task");
        };
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(sheet.last_search(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unselect_regex_on_cursor_column() {
        let (d, sheet) = dispatcher(&[&["bob"], &["alice"], &["Bill"]]);
        run(&d, "select-all", &[], &[]);
        run(&d, "unselect-regex", &[], &["^b"]);
        let selected: Vec<bool> = sheet.read(|t| t.rows.iter().map(|r| r.selected).collect());
        assert_eq!(selected, vec![false, true, false]);
        assert!(history_has(&d, "unselected 2 rows"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_goto_row_and_column() {
        let (d, sheet) = dispatcher(&[&["a", "1", "x"], &["b", "2", "y"], &["c", "3", "z"]]);
        run(&d, "goto-row", &[], &["2"]);
        run(&d, "goto-column", &[], &["c1"]);
        assert_eq!(sheet.cursor_position(), crate::sheet::Cursor { row: 2, col: 1 });
        run(&d, "goto-row", &[], &["99"]);
        run(&d, "goto-column", &[], &["0"]);
        assert_eq!(sheet.cursor_position(), crate::sheet::Cursor { row: 2, col: 0 });

        let DispatchOutcome::Spawned(task) = run(&d, "goto-row", &[], &["two"]) else {
            panic!("expected a task");
        };
        assert_eq!(task.status(), TaskStatus::Failed);
        let DispatchOutcome::Spawned(task) = run(&d, "goto-column", &[], &["missing"]) else {
            panic!("expected a task");
        };
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_paging_moves_a_fixed_page() {
        let rows: Vec<Vec<String>> = (0..45).map(|i| vec![i.to_string()]).collect();
        let refs: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
        let slices: Vec<&[&str]> = refs.iter().map(Vec::as_slice).collect();
        let (d, sheet) = dispatcher(&slices);
        run(&d, "page-down", &[], &[]);
        assert_eq!(sheet.cursor_position().row, PAGE_ROWS);
        run(&d, "page-down", &[], &[]);
        run(&d, "page-down", &[], &[]);
        assert_eq!(sheet.cursor_position().row, 44);
        run(&d, "page-up", &[], &[]);
        assert_eq!(sheet.cursor_position().row, 44 - PAGE_ROWS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_edit_cell_sets_value() {
        let (d, sheet) = dispatcher(&[&["a", "1"], &["b"]]);
        run(&d, "go-down", &[], &[]);
        run(&d, "go-right", &[], &[]);
        run(&d, "edit-cell", &[], &["new"]);
        assert_eq!(sheet.read(|t| t.rows[1].cells.clone()), vec!["b", "new"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_sheet_writes_a_reloadable_file() {
        let path = std::env::temp_dir().join(format!("sheetdeck-{}.tsv", uuid::Uuid::new_v4()));
        let (d, sheet) = dispatcher(&[&["a b", "1"], &["c\td", "2"]]);
        run(&d, "save-sheet", &[], &[path.to_str().unwrap()]);
        let reloaded = loader::load(&path, true, |_, _| true).unwrap();
        assert_eq!(reloaded.columns, vec!["c0", "c1"]);
        assert_eq!(reloaded.rows, sheet.snapshot().rows);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_last_error_sheet() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        run(&d, "last-error", &[], &[]);
        assert_eq!(d.env().workspace.len(), 1);
        assert!(history_has(&d, "no error yet"));

        d.env().status.error("first");
        d.env().status.error("load failed\nline 2");
        d.env().status.info("later");
        run(&d, "last-error", &[], &[]);
        let top = d.env().workspace.top().unwrap();
        assert_eq!(top.name(), "last_error");
        assert_eq!(column(&top, 0), vec!["load failed", "line 2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sheets_sheet_jumps_to_chosen_sheet() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        d.env().workspace.push(table_sheet("b", &[&["y"]]));
        run(&d, "sheets-sheet", &[], &[]);
        let list = d.env().workspace.top().unwrap();
        assert_eq!(list.name(), SHEETS_SHEET);
        assert_eq!(column(&list, 0), vec!["b", "a"]);

        run(&d, "go-down", &[], &[]);
        run(&d, "jump-to-sheet", &[], &[]);
        assert_eq!(names(&d), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cycle_and_swap_sheets() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        d.env().workspace.push(table_sheet("b", &[&["y"]]));
        d.env().workspace.push(table_sheet("c", &[&["z"]]));
        run(&d, "cycle-sheets", &[], &[]);
        assert_eq!(names(&d), vec!["b", "a", "c"]);
        run(&d, "reverse-cycle-sheets", &[], &[]);
        assert_eq!(names(&d), vec!["c", "b", "a"]);
        run(&d, "swap-sheets", &[], &[]);
        assert_eq!(names(&d), vec!["b", "c", "a"]);
        let (cmd, _) = d.resolve(&"Ctrl+^".into(), &InputMode::Normal).unwrap();
        assert_eq!(cmd.name, "swap-sheets");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_task_controls_are_bound_in_both_modes_and_unrecorded() {
        let (d, _sheet) = dispatcher(&[&["x"]]);
        let edit = InputMode::custom(EDIT_MODE);
        for (key, name) in [("Ctrl+C", "cancel-newest"), ("Ctrl+Z", "toggle-pause")] {
            for mode in [&InputMode::Normal, &edit] {
                let (cmd, _) = d.resolve(&key.into(), mode).unwrap();
                assert_eq!(cmd.name, name);
                assert!(!cmd.recorded);
            }
        }
        assert!(d.resolve(&"Ctrl+O".into(), &InputMode::Normal).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_newest_stops_a_paused_sort() {
        let (d, sheet) = dispatcher(&[&["3"], &["1"], &["2"]]);
        run(&d, "toggle-pause", &[], &[]);
        assert!(d.env().tasks.is_paused_all());
        let sort = d.env().registry.command("sort-asc", "table", sheet.id()).unwrap();
        let DispatchOutcome::Spawned(task) = d.dispatch(Invocation::new(sort, Arc::clone(&sheet))) else {
            panic!("expected a task");
        };
        let cancel = d.env().registry.command("cancel-newest", "table", sheet.id()).unwrap();
        assert!(matches!(
            d.dispatch(Invocation::new(cancel, Arc::clone(&sheet))),
            DispatchOutcome::Completed(_)
        ));
        assert!(task.is_cancel_requested());
        let toggle = d.env().registry.command("toggle-pause", "table", sheet.id()).unwrap();
        d.dispatch(Invocation::new(toggle, Arc::clone(&sheet)));
        d.env().tasks.join_all(sheet.id());
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert_eq!(column(&sheet, 0), vec!["3", "1", "2"]);

        run(&d, "cancel-newest", &[], &[]);
        assert!(history_has(&d, "no running task on this sheet"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_opens_files_in_argument_order() {
        let dir = std::env::temp_dir();
        let a = dir.join(format!("sheetdeck-{}.csv", uuid::Uuid::new_v4()));
        let b = dir.join(format!("sheetdeck-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&a, "k\n1\n").unwrap();
        std::fs::write(&b, "k\n2\n3\n").unwrap();

        let d = Dispatcher::new(test_env());
        let first = start(&d, &[a.clone(), b.clone()]);
        assert_eq!(first.name(), HELP_SHEET);
        let names: Vec<String> = d.env().workspace.sheets().iter().map(|s| s.name()).collect();
        let stem = |p: &PathBuf| p.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(names, vec![stem(&b), stem(&a), HELP_SHEET.to_string()]);
        assert_eq!(d.env().workspace.top().unwrap().row_count(), 2);

        let _ = std::fs::remove_file(&a);
        let _ = std::fs::remove_file(&b);
    }
}
