use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use simplelog::{ConfigBuilder, WriteLogger};
use tokio::runtime::Handle;

use sheetdeck::core::config::{self, ResolvedConfig, SheetdeckConfig};
use sheetdeck::core::replay::ReplayEngine;
use sheetdeck::core::session::Recorder;
use sheetdeck::core::state::App;
use sheetdeck::sheet::{TableSheet, commands, loader};
use sheetdeck::tui;

#[derive(Parser)]
#[command(name = "sheetdeck", version, about = "Terminal table viewer with background tasks and session replay")]
struct Args {
    /// Files to open at startup
    files: Vec<PathBuf>,

    /// Replay a recorded session log
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Minimum wait between replayed commands, in milliseconds
    #[arg(long, value_name = "MS")]
    replay_delay: Option<u64>,

    /// Record this session to a log file
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,

    /// Replay without a terminal and print the final sheet as TSV
    #[arg(long, requires = "replay")]
    batch: bool,
}

fn init_logger(config: &ResolvedConfig) {
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    match File::create(&config.log_file) {
        Ok(log_file) => {
            let _ = WriteLogger::init(config.log_level, log_config, log_file);
        }
        Err(e) => eprintln!("sheetdeck: cannot open log file {:?}: {}", config.log_file, e),
    }
}

/// Headless replay. Prints the active sheet on success.
fn run_batch(config: &ResolvedConfig, mut engine: ReplayEngine<TableSheet>, record: Option<PathBuf>) -> ExitCode {
    let mut app: App<TableSheet> = App::new(Handle::current(), config);
    if record.is_some() {
        app = app.with_recorder(Recorder::new());
    }
    commands::start(app.dispatcher(), &[]);

    let result = engine.run(app.dispatcher());
    let code = match result {
        Ok(submitted) => {
            info!("Batch replay submitted {} entries", submitted);
            match app.active_sheet().map(|sheet| sheet.read(loader::to_tsv)) {
                Some(Err(e)) => {
                    eprintln!("sheetdeck: {e}");
                    ExitCode::FAILURE
                }
                Some(Ok(text)) => {
                    print!("{text}");
                    ExitCode::SUCCESS
                }
                None => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            eprintln!("sheetdeck: {e}");
            ExitCode::FAILURE
        }
    };

    app.shutdown();
    if let (Some(path), Some(recorder)) = (record, app.recorder())
        && let Err(e) = recorder.save(&path)
    {
        warn!("Failed to save recording to {:?}: {}", path, e);
    }
    code
}

#[tokio::main]
async fn main() -> std::io::Result<ExitCode> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let file_config = config::load_config().unwrap_or_else(|e| {
        eprintln!("sheetdeck: {e}; using defaults");
        SheetdeckConfig::default()
    });
    let config = config::resolve(&file_config, args.replay_delay);
    init_logger(&config);
    info!("Sheetdeck {} starting up", env!("CARGO_PKG_VERSION"));

    let replay = match &args.replay {
        Some(path) => match ReplayEngine::load(path, config.replay_delay) {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!("Cannot load replay log {:?}: {}", path, e);
                eprintln!("sheetdeck: cannot load {}: {}", path.display(), e);
                return Ok(ExitCode::FAILURE);
            }
        },
        None => None,
    };

    if args.batch {
        if let Some(engine) = replay {
            return Ok(run_batch(&config, engine, args.record));
        }
    }

    tui::run(
        config,
        tui::Session {
            files: args.files,
            replay,
            record: args.record,
        },
    )?;
    Ok(ExitCode::SUCCESS)
}
