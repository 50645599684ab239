pub mod daemon_path;
pub mod dates;
pub mod filter;
pub mod interval;
pub mod process;
pub mod record;
pub mod report;

use std::{env, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use interval::{process_time_command, TimeCommand};
use process::{kill_previous_servers, restart_server};
use record::{process_record_command, RecordCommand};
use report::{process_report_command, ReportCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    app::App,
    config::Config,
    daemon::start_daemon,
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "exewatch", version, long_about = None)]
#[command(about = "Tracks how long you spend in specific programs", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {},
    #[command(
        about = "Run a daemon directly in current console. Used for debugging"
    )]
    Serve {
        #[arg(long, help = "Mirror the store into snapshot.json after every change")]
        snapshot: bool,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Manage tracked programs")]
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    #[command(about = "Manage time intervals of a program")]
    Time {
        #[command(subcommand)]
        command: TimeCommand,
    },
    #[command(about = "Display time spent in every program")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => ensure_dir(dir)?.canonicalize()?,
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => restart_server(&dir),
        Commands::Stop {} => {
            kill_previous_servers(&to_daemon_path(env::current_exe()?));
            Ok(())
        }
        Commands::Serve { snapshot } => start_daemon(dir, snapshot).await,
        Commands::Record { command } => process_record_command(&open_app(&dir)?, command),
        Commands::Time { command } => process_time_command(&open_app(&dir)?, command),
        Commands::Report { command } => process_report_command(&open_app(&dir)?, command),
    }
}

/// Store access for one-shot commands. A running daemon picks up the changes on its next flush.
fn open_app(dir: &std::path::Path) -> Result<App> {
    let config = Config::load_or_create(dir)?;
    Ok(App::open(dir, config.snapshot)?)
}
