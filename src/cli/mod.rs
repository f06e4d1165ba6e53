pub mod report;
pub mod task;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use report::{print_check, process_history_command, process_summary_command, HistoryCommand, SummaryCommand};
use task::{process_task_command, TaskCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    monitor::{
        args::MonitorArgs, config::MonitorConfig, run_single_check, scheduler::CheckOutcome,
        start_monitor,
    },
    storage::activity_store::SqliteActivityStore,
    utils::{
        clock::DefaultClock,
        dir::create_application_default_path,
        logging::{enable_logging, LogTarget},
    },
};

const DATABASE_FILE: &str = "acuity.db";

#[derive(Parser, Debug)]
#[command(name = "Acuity", version, long_about = None)]
#[command(about = "Checks whether what's on your screen matches the task you said you're working on", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long = "db-path",
        env = "ACUITY_DB_PATH",
        global = true,
        help = "SQLite database. Defaults to acuity.db inside the application directory"
    )]
    db_path: Option<PathBuf>,
    #[arg(long, global = true, help = "Print logs to the console")]
    log: bool,
    #[arg(long = "log-filter", global = true)]
    log_filter: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the monitor in the current console until interrupted")]
    Serve {
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Standalone one-shot check. Starts without a previous frame, so it's always classified and
    /// never counted as idle. Independent of any running `serve`.
    #[command(about = "Capture and classify the screen once, right now, independent of `serve`")]
    Check {
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    #[command(about = "Start, complete or show the current task")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    #[command(about = "Show the focus rollup for a day")]
    Summary {
        #[command(flatten)]
        command: SummaryCommand,
    },
    #[command(about = "Show the most recent checks")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;

    let logging_level = args
        .log_filter
        .or_else(|| args.log.then_some(LevelFilter::TRACE));
    let target = match args.commands {
        Commands::Serve { .. } => LogTarget::Monitor,
        _ => LogTarget::Cli,
    };
    enable_logging(target, &app_dir, logging_level, args.log)?;

    let db_path = args.db_path.unwrap_or_else(|| app_dir.join(DATABASE_FILE));
    let open_store = move || SqliteActivityStore::open(db_path, Arc::new(DefaultClock)).map(Arc::new);

    match args.commands {
        Commands::Serve { monitor } => {
            let config = MonitorConfig::try_from(monitor)?;
            start_monitor(config, open_store()?).await
        }
        Commands::Check { monitor } => {
            let config = MonitorConfig::try_from(monitor)?;
            match run_single_check(config, open_store()?).await? {
                CheckOutcome::Logged(result) => {
                    print_check(&result, None);
                    Ok(())
                }
                CheckOutcome::NoActiveTask => {
                    println!("No active task. Start one with `acuity task start <description>`");
                    Ok(())
                }
                CheckOutcome::Failed => bail!("check failed, see the logs for details"),
            }
        }
        Commands::Task { command } => process_task_command(command, open_store()?.as_ref()).await,
        Commands::Summary { command } => process_summary_command(command, open_store()?.as_ref()).await,
        Commands::History { command } => process_history_command(command, open_store()?.as_ref()).await,
    }
}
