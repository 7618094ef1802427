//! Record/replay and task scenarios driven headlessly through the public API.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use sheetdeck::core::config::ResolvedConfig;
use sheetdeck::core::dispatch::{DispatchError, DispatchOutcome, Invocation};
use sheetdeck::core::prompt::{NoPrompter, ScriptedPrompter};
use sheetdeck::core::registry::InputMode;
use sheetdeck::core::replay::{DesyncReason, ReplayEngine, ReplayError, ReplayProgress};
use sheetdeck::core::session::{Recorder, ReplayLog};
use sheetdeck::core::state::App;
use sheetdeck::core::task::TaskStatus;
use sheetdeck::sheet::{Sheet, Table, TableSheet, commands};
use std::time::Duration;
use tokio::runtime::Handle;

const FRUIT: &str = "name,kind,n\npear,x,3\napple,y,10\nfig,x,1\nplum,z,7\nkiwi,x,2\n";

fn temp_csv(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sheetdeck-it-{}.csv", uuid::Uuid::new_v4()));
    fs::write(&path, contents).unwrap();
    path
}

fn app(answers: &[&str]) -> App<TableSheet> {
    let answers = answers.iter().map(|a| a.to_string()).collect();
    App::new(Handle::current(), &ResolvedConfig::default())
        .with_prompters(Arc::new(NoPrompter), Arc::new(ScriptedPrompter::new(answers)))
}

fn recording_app(answers: &[&str]) -> App<TableSheet> {
    app(answers).with_recorder(Recorder::new())
}

/// Presses a key on the active sheet and waits for anything it spawned.
fn press(app: &App<TableSheet>, key: &str) {
    let sheet = app.active_sheet().unwrap();
    let outcome = app.dispatcher().dispatch_key(&key.into(), &InputMode::Normal);
    assert!(outcome.is_ok(), "key {key} did not resolve");
    app.tasks().join_all(sheet.id());
}

/// Runs a command by name with arguments on the active sheet and waits.
fn run(app: &App<TableSheet>, name: &str, args: &[&str]) -> DispatchOutcome<TableSheet> {
    let sheet = app.active_sheet().unwrap();
    let command = app
        .registry()
        .command(name, sheet.sheet_type(), sheet.id())
        .unwrap();
    let outcome = app.dispatcher().dispatch(
        Invocation::new(command, Arc::clone(&sheet)).args(args.iter().map(|a| a.to_string()).collect()),
    );
    app.tasks().join_all(sheet.id());
    outcome
}

fn active_table(app: &App<TableSheet>) -> Table {
    app.active_sheet().unwrap().snapshot()
}

fn names(table: &Table) -> Vec<String> {
    table.rows.iter().map(|r| r.cell(0).to_string()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_sort_filter_scenario() {
    let path = temp_csv(FRUIT);
    let app = app(&["x"]);
    commands::start(app.dispatcher(), &[path.clone()]);

    assert!(matches!(run(&app, "sort-asc", &["n"]), DispatchOutcome::Spawned(_)));
    assert_eq!(names(&active_table(&app)), vec!["fig", "kiwi", "pear", "plum", "apple"]);

    assert!(matches!(run(&app, "filter-equal", &["kind"]), DispatchOutcome::Spawned(_)));
    assert_eq!(names(&active_table(&app)), vec!["fig", "kiwi", "pear"]);

    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recorded_session_replays_to_the_same_rows() {
    let path = temp_csv(FRUIT);

    let recording = recording_app(&["x"]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    press(&recording, "l");
    press(&recording, "]");
    press(&recording, "j");
    press(&recording, "s");
    press(&recording, "|");
    press(&recording, "g j");
    let recorded = active_table(&recording);
    let log = recording.recorder().unwrap().log();
    assert_eq!(log.entries.len(), 7);
    assert_eq!(log.entries[0].command, "open-file");
    assert_eq!(log.entries[5].answers, vec!["x".to_string()]);

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    let mut engine = ReplayEngine::new(log, Duration::ZERO);
    assert_eq!(engine.run(replaying.dispatcher()).unwrap(), 7);
    assert!(engine.is_finished());
    assert_eq!(active_table(&replaying), recorded);

    recording.shutdown();
    replaying.shutdown();
    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_saved_log_replays_from_disk() {
    let path = temp_csv(FRUIT);
    let log_path = std::env::temp_dir().join(format!("sheetdeck-it-{}.json", uuid::Uuid::new_v4()));

    let recording = recording_app(&[]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    press(&recording, "d");
    press(&recording, "End");
    recording.recorder().unwrap().save(&log_path).unwrap();

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    let mut engine = ReplayEngine::load(&log_path, Duration::ZERO).unwrap();
    engine.run(replaying.dispatcher()).unwrap();
    assert_eq!(active_table(&replaying), active_table(&recording));

    let _ = fs::remove_file(&path);
    let _ = fs::remove_file(&log_path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unbound_key_is_not_found_and_spawns_nothing() {
    let app = app(&[]);
    commands::start(app.dispatcher(), &[]);
    let result = app.dispatcher().dispatch_key(&"Z".into(), &InputMode::Normal);
    assert!(matches!(result, Err(DispatchError::NotFound { .. })));
    assert!(app.tasks().all().is_empty());
    assert!(
        app.status()
            .visible()
            .iter()
            .any(|m| m.text.contains("no command for key Z"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_confirmation_desyncs_and_keeps_earlier_effects() {
    let path = temp_csv(FRUIT);

    let recording = recording_app(&["y"]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    press(&recording, "s");
    press(&recording, "g d");
    assert_eq!(active_table(&recording).rows.len(), 4);

    let mut log: ReplayLog = recording.recorder().unwrap().log();
    let last = log.entries.len() - 1;
    assert_eq!(log.entries[last].command, "delete-selected");
    log.entries[last].answers.clear();

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    let mut engine = ReplayEngine::new(log, Duration::ZERO);
    match engine.run(replaying.dispatcher()) {
        Err(ReplayError::Desync { entry, reason, .. }) => {
            assert_eq!(entry, last);
            assert_eq!(reason, DesyncReason::AnswersExhausted { recorded: 0 });
        }
        other => panic!("expected a desync, got {other:?}"),
    }
    let table = active_table(&replaying);
    assert_eq!(table.rows.len(), 5);
    assert!(table.rows[0].selected);

    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_sort_leaves_sheet_unchanged() {
    let app = app(&[]);
    let rows: Vec<Vec<String>> = (0..5000).rev().map(|i| vec![i.to_string()]).collect();
    let sheet = Arc::new(TableSheet::with_table("big", "table", Table::new(vec!["n".into()], rows)));
    commands::install(app.registry());
    app.workspace().push(Arc::clone(&sheet));
    let before = sheet.snapshot();

    app.tasks().pause_all();
    let task = match run_detached(&app, "sort-asc") {
        DispatchOutcome::Spawned(task) => task,
        other => panic!("expected a task, got {other:?}"),
    };
    assert!(app.tasks().cancel(task.id()));
    app.tasks().resume_all();
    app.tasks().join_all(sheet.id());

    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert_eq!(sheet.snapshot(), before);
}

/// Dispatches without waiting.
fn run_detached(app: &App<TableSheet>, name: &str) -> DispatchOutcome<TableSheet> {
    let sheet = app.active_sheet().unwrap();
    let command = app
        .registry()
        .command(name, sheet.sheet_type(), sheet.id())
        .unwrap();
    app.dispatcher().dispatch(Invocation::new(command, sheet))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_join_on_one_sheet_ignores_work_on_another() {
    let app = app(&[]);
    commands::install(app.registry());
    let rows = |n: usize| (0..n).rev().map(|i| vec![i.to_string()]).collect::<Vec<_>>();
    let busy = Arc::new(TableSheet::with_table("busy", "table", Table::new(vec!["n".into()], rows(5000))));
    let quick = Arc::new(TableSheet::with_table("quick", "table", Table::new(vec!["n".into()], rows(10))));

    app.workspace().push(Arc::clone(&busy));
    app.tasks().pause_all();
    let DispatchOutcome::Spawned(slow) = run_detached(&app, "sort-asc") else {
        panic!("sort did not spawn");
    };
    assert!(app.tasks().pause(slow.id()));
    app.tasks().resume_all();

    app.workspace().push(Arc::clone(&quick));
    let DispatchOutcome::Spawned(fast) = run_detached(&app, "sort-asc") else {
        panic!("sort did not spawn");
    };
    app.tasks().join_all(quick.id());

    assert_eq!(fast.status(), TaskStatus::Done);
    assert_eq!(quick.snapshot().rows[0].cell(0), "0");
    assert!(!slow.status().is_terminal());

    app.tasks().resume(slow.id());
    app.tasks().join_all(busy.id());
    assert_eq!(slow.status(), TaskStatus::Done);
    assert_eq!(busy.snapshot().rows[0].cell(0), "0");
}

/// Waits for the tasks of every open sheet.
fn settle(app: &App<TableSheet>) {
    for sheet in app.workspace().sheets() {
        app.tasks().join_all(sheet.id());
    }
}

fn view(app: &App<TableSheet>) -> (String, Table) {
    let sheet = app.active_sheet().unwrap();
    (sheet.name(), sheet.snapshot())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dismissed_prompt_is_replayed_as_dismissed() {
    let path = temp_csv(FRUIT);
    let recording = App::new(Handle::current(), &ResolvedConfig::default())
        .with_prompters(
            Arc::new(NoPrompter),
            Arc::new(ScriptedPrompter::new(vec![]).then_abort(true)),
        )
        .with_recorder(Recorder::new());
    commands::start(recording.dispatcher(), &[path.clone()]);
    press(&recording, "|");
    press(&recording, "j");
    let recorded = active_table(&recording);
    assert_eq!(recorded.rows.len(), 5);
    assert_eq!(recorded.cursor.row, 1);

    let log = recording.recorder().unwrap().log();
    let commands: Vec<&str> = log.entries.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["open-file", "filter-equal", "go-down"]);
    assert!(log.entries[1].aborted);
    assert!(log.entries[1].answers.is_empty());

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    let mut engine = ReplayEngine::new(log, Duration::ZERO);
    assert_eq!(engine.run(replaying.dispatcher()).unwrap(), 3);
    assert_eq!(active_table(&replaying), recorded);

    recording.shutdown();
    replaying.shutdown();
    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_sort_is_recorded_and_replayed_cancelled() {
    let path = temp_csv("n\n3\n1\n2\n");
    let recording = recording_app(&[]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    let sheet = recording.active_sheet().unwrap();

    press(&recording, "Ctrl+Z");
    let sort = recording.dispatcher().dispatch_key(&"[".into(), &InputMode::Normal);
    let Ok(DispatchOutcome::Spawned(task)) = sort else {
        panic!("sort did not spawn");
    };
    press(&recording, "Ctrl+C");
    press(&recording, "Ctrl+Z");
    recording.tasks().join_all(sheet.id());
    assert_eq!(task.status(), TaskStatus::Cancelled);
    let recorded = active_table(&recording);
    assert_eq!(names(&recorded), vec!["3", "1", "2"]);

    let log = recording.recorder().unwrap().log();
    assert_eq!(log.entries.len(), 2);
    assert_eq!(log.entries[1].command, "sort-asc");
    assert!(log.entries[1].cancelled);

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    ReplayEngine::new(log, Duration::ZERO)
        .run(replaying.dispatcher())
        .unwrap();
    assert_eq!(active_table(&replaying), recorded);

    recording.shutdown();
    replaying.shutdown();
    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replay_matches_recording_after_every_entry() {
    let path = temp_csv(FRUIT);
    let recording = recording_app(&["x", "x", "1"]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    let mut recorded = vec![view(&recording)];
    for key in ["l", "]", "j", "s", "|", "/", "n", "S", "Enter", "r", "PageDown", "g j"] {
        press(&recording, key);
        recorded.push(view(&recording));
    }
    let log = recording.recorder().unwrap().log();
    assert_eq!(log.entries.len(), recorded.len());

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    let mut engine = ReplayEngine::new(log, Duration::ZERO);
    let mut replayed = Vec::new();
    loop {
        match engine.poll(replaying.dispatcher()).unwrap() {
            ReplayProgress::Submitted(index) => {
                settle(&replaying);
                assert_eq!(index, replayed.len());
                replayed.push(view(&replaying));
            }
            ReplayProgress::Waiting => std::thread::sleep(Duration::from_millis(1)),
            ReplayProgress::Finished => break,
        }
    }
    assert_eq!(replayed.len(), recorded.len());
    for (i, (replayed, recorded)) in replayed.iter().zip(&recorded).enumerate() {
        assert_eq!(replayed, recorded, "state differs after entry {i}");
    }

    recording.shutdown();
    replaying.shutdown();
    let _ = fs::remove_file(&path);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_keys_pressed_during_a_running_sort_replay_in_order() {
    let rows: String = (0..3000).rev().map(|i| format!("{i}\n")).collect();
    let path = temp_csv(&format!("n\n{rows}"));
    let recording = recording_app(&[]);
    commands::start(recording.dispatcher(), &[path.clone()]);
    let sheet = recording.active_sheet().unwrap();

    recording.tasks().pause_all();
    let sort = recording.dispatcher().dispatch_key(&"[".into(), &InputMode::Normal);
    let Ok(DispatchOutcome::Spawned(task)) = sort else {
        panic!("sort did not spawn");
    };
    for key in ["j", "j", "Ctrl+G"] {
        recording
            .dispatcher()
            .dispatch_key(&key.into(), &InputMode::Normal)
            .unwrap();
    }
    assert!(!task.status().is_terminal());
    recording.tasks().resume_all();
    recording.tasks().join_all(sheet.id());
    assert_eq!(task.status(), TaskStatus::Done);
    let recorded = active_table(&recording);
    assert_eq!(recorded.cursor.row, 2);
    assert_eq!(recorded.rows[0].cell(0), "0");

    let log = recording.recorder().unwrap().log();
    let commands: Vec<&str> = log.entries.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["open-file", "sort-asc", "go-down", "go-down", "sheet-info"]);

    let replaying = app(&[]);
    commands::start(replaying.dispatcher(), &[]);
    ReplayEngine::new(log, Duration::ZERO)
        .run(replaying.dispatcher())
        .unwrap();
    assert_eq!(active_table(&replaying), recorded);

    recording.shutdown();
    replaying.shutdown();
    let _ = fs::remove_file(&path);
}
