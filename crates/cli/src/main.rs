use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_model::{Error, RepairResult};
use repair::RepairOptions;
use store_fs::FsStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "session-repair")]
#[command(about = "Find and repair opencode sessions broken by thinking-block signature errors")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// opencode storage directory (default: ~/.local/share/opencode/storage)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    /// Where backups are written (default: <storage>/repair-backups)
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    /// More log output on stderr; repeat for debug
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List corrupted sessions and what a fix would remove
    List {
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// Back up and remove the messages that poison a session
    Fix(FixArgs),
    /// Put the files from a repair backup back into storage
    Restore {
        backup: PathBuf,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("which").required(true).args(["target", "all"]))]
struct FixArgs {
    /// Session ID, message ID, or a unique prefix of either
    target: Option<String>,
    #[arg(long, default_value_t = false)]
    all: bool,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::Config::load()?;
    let roots = config.resolve(cli.storage, cli.backup_dir)?;
    let store = FsStore::open(&roots.storage_root)
        .with_context(|| format!("cannot use storage at {}", roots.storage_root.display()))?;
    info!(storage = %roots.storage_root.display(), backups = %roots.backup_root.display(), "using storage");
    let use_color = ui::color_enabled();

    match cli.command {
        Commands::List { format } => {
            let corrupted = scan::scan(&store)?;
            let groups: Vec<_> = corrupted.iter().map(|c| scan::resolve(&store, c)).collect();
            let plans: Vec<_> = groups.iter().map(|g| repair::plan(&store, g)).collect();
            match format {
                ListFormat::Text => print!("{}", ui::render_list(&groups, &plans, use_color)),
                ListFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&ui::build_json_list(&groups, &plans))?
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fix(args) => {
            let options = RepairOptions {
                backup_root: roots.backup_root,
                dry_run: args.dry_run,
            };
            let results = if args.all {
                let results = repair::repair_all(&store, &options)?;
                if results.is_empty() {
                    println!("No corrupted sessions found.");
                }
                results
            } else {
                let target = args.target.unwrap_or_default();
                let session_id = match scan::resolve_target(&store, &target) {
                    Ok(id) => id,
                    Err(err @ Error::NotFound { .. }) => {
                        print_available(&store);
                        return Err(err.into());
                    }
                    Err(err) => return Err(err.into()),
                };
                vec![repair::repair_session(&store, &options, &session_id)]
            };
            Ok(report(&results, args.dry_run, use_color))
        }
        Commands::Restore { backup, dry_run } => {
            let report = repair::restore(&store, &backup, dry_run)
                .with_context(|| format!("restore from {} failed", backup.display()))?;
            print!("{}", ui::render_restore(&report));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(results: &[RepairResult], dry_run: bool, use_color: bool) -> ExitCode {
    for result in results {
        print!("{}", ui::render_result(result, use_color));
    }
    let removed: usize = results.iter().map(|r| r.messages_removed.len()).sum();
    if !dry_run && removed > 0 {
        println!("\nRestart opencode so it reloads the repaired sessions.");
    }
    if results.iter().any(RepairResult::is_failed) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_available(store: &FsStore) {
    let Ok(corrupted) = scan::scan(store) else {
        return;
    };
    if corrupted.is_empty() {
        eprintln!("No corrupted sessions found.");
        return;
    }
    eprintln!("Corrupted sessions:");
    for c in &corrupted {
        eprintln!("  {}  {}", c.session.id, c.session.title);
    }
}
