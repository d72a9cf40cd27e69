mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, status::StatusSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "notesync",
    about = "Append timestamped status updates to task-tracker notes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .notesync/ or .git/)
    #[arg(long, global = true, env = "NOTESYNC_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .notesync/config.yaml
    Init {
        /// Record store base id
        #[arg(long, default_value = "")]
        base_id: String,
        /// Table holding task records
        #[arg(long, default_value = "Tasks")]
        table: String,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Append a status update to a task's notes
    Update {
        task_id: String,
        /// Status text (done, in progress, planned, blocked, ...)
        #[arg(long, short)]
        status: String,
        /// Update text; `-` reads stdin, `@path` reads a file
        #[arg(required = true)]
        content: Vec<String>,
        /// Print the new notes without writing them
        #[arg(long)]
        dry_run: bool,
        /// Leave the record's status field unchanged
        #[arg(long)]
        keep_status: bool,
        /// Reject status text outside the known synonyms
        #[arg(long)]
        strict: bool,
    },

    /// Show a task's notes history
    Show {
        task_id: String,
        /// Print the notes field as stored
        #[arg(long)]
        raw: bool,
    },

    /// Apply a YAML manifest of updates
    Sync {
        manifest: PathBuf,
        /// Compute every update without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect the status vocabulary
    Status {
        #[command(subcommand)]
        subcommand: StatusSubcommand,
    },

    /// Show or validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init {
            base_id,
            table,
            force,
        } => cmd::init::run(&root, &base_id, &table, force),
        Commands::Update {
            task_id,
            status,
            content,
            dry_run,
            keep_status,
            strict,
        } => cmd::update::run(
            &root,
            cmd::update::UpdateArgs {
                task_id,
                status,
                content,
                dry_run,
                keep_status,
                strict,
            },
            cli.json,
        ),
        Commands::Show { task_id, raw } => cmd::show::run(&root, &task_id, raw, cli.json),
        Commands::Sync { manifest, dry_run } => {
            cmd::sync::run(&root, &manifest, dry_run, cli.json)
        }
        Commands::Status { subcommand } => cmd::status::run(subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
