//! # Project Context CLI (`pctx`)
//!
//! ## Usage
//!
//! ```bash
//! pctx --config ./config/pctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pctx init` | Create the SQLite database and run schema migrations |
//! | `pctx index <path>` | Discover, chunk, embed, and store a project |
//! | `pctx clear <path>` | Delete a project's vectors for one user |
//! | `pctx context store <path> --file <json>` | Store a new analysis version |
//! | `pctx context show <path>` | Print the latest analysis (or `--history`) |
//! | `pctx context list` | List projects with stored analyses |
//! | `pctx context delete <path>` | Delete every analysis version of a project |
//! | `pctx prompt <path> "<question>"` | Print the composed prompt without generating |
//! | `pctx ask <path> "<question>"` | Answer a question with project-aware context |
//! | `pctx stats` | Database statistics |
//!
//! Logging goes to stderr and is controlled by `PCTX_LOG`
//! (e.g. `PCTX_LOG=project_context=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use project_context::config;
use project_context::context_cmd;
use project_context::index::{self, IndexArgs};
use project_context::migrate;
use project_context::progress::ProgressMode;
use project_context::relevance::{self, QuestionArgs};
use project_context::stats;
use project_context::DEFAULT_USER;

/// Project Context CLI: project-aware retrieval for AI chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pctx",
    about = "Project Context: index a codebase and compose project-aware chat prompts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a project directory.
    ///
    /// Walks the project, chunks each text file, embeds the chunks in
    /// batches, and stores them scoped to the project and user. Failures
    /// are recorded per file and batch; the run always completes.
    Index {
        /// Project root directory.
        path: PathBuf,

        /// Clear this project's vectors for the user before indexing.
        #[arg(long)]
        full: bool,

        /// Owner of the indexed rows.
        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        /// Override the project id (defaults to the hash of the path).
        #[arg(long)]
        project_id: Option<String>,

        /// Stop after this many seconds and report what was done.
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,

        /// Progress output: human, json, or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Delete a project's vectors for one user.
    Clear {
        path: PathBuf,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        #[arg(long)]
        project_id: Option<String>,
    },

    /// Manage stored project analyses.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Compose the prompt for a question without generating an answer.
    Prompt {
        path: PathBuf,
        question: String,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        #[arg(long)]
        project_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Answer a question about a project.
    Ask {
        path: PathBuf,
        question: String,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        #[arg(long)]
        project_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show vector and context counts.
    Stats,
}

#[derive(Subcommand)]
enum ContextAction {
    /// Store analyzer JSON as the next version for a project.
    Store {
        path: PathBuf,

        /// Analyzer output (camelCase JSON).
        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,
    },

    /// Print the latest analysis for a project.
    Show {
        path: PathBuf,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,

        /// Print every version, oldest first.
        #[arg(long)]
        history: bool,
    },

    /// List projects with stored analyses.
    List {
        #[arg(long, default_value = DEFAULT_USER)]
        user: String,
    },

    /// Delete every analysis version of a project.
    Delete {
        path: PathBuf,

        #[arg(long, default_value = DEFAULT_USER)]
        user: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PCTX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            path,
            full,
            user,
            project_id,
            timeout,
            json,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index::run_index(
                &cfg,
                IndexArgs {
                    path,
                    user,
                    project_id,
                    full,
                    timeout_secs: timeout,
                    json,
                    progress,
                },
            )
            .await?;
        }
        Commands::Clear {
            path,
            user,
            project_id,
        } => {
            index::run_clear(&cfg, &path, &user, project_id).await?;
        }
        Commands::Context { action } => match action {
            ContextAction::Store { path, file, user } => {
                context_cmd::run_store(&cfg, &path, &file, &user).await?;
            }
            ContextAction::Show {
                path,
                user,
                history,
            } => {
                context_cmd::run_show(&cfg, &path, &user, history).await?;
            }
            ContextAction::List { user } => {
                context_cmd::run_list(&cfg, &user).await?;
            }
            ContextAction::Delete { path, user } => {
                context_cmd::run_delete(&cfg, &path, &user).await?;
            }
        },
        Commands::Prompt {
            path,
            question,
            user,
            project_id,
            json,
        } => {
            relevance::run_prompt(
                &cfg,
                QuestionArgs {
                    path,
                    question,
                    user,
                    project_id,
                    json,
                },
            )
            .await?;
        }
        Commands::Ask {
            path,
            question,
            user,
            project_id,
            json,
        } => {
            relevance::run_ask(
                &cfg,
                QuestionArgs {
                    path,
                    question,
                    user,
                    project_id,
                    json,
                },
            )
            .await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
