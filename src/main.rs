//! # Code Harness CLI (`chx`)
//!
//! The `chx` binary indexes a source tree and answers questions about it.
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./chx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx init` | Write a default `chx.toml` (if missing) and create the database |
//! | `chx index` | Parse, chunk, embed, and store the configured source tree |
//! | `chx query "<question>"` | Answer a question from the index |
//! | `chx chat` | Interactive questions with conversation history |
//! | `chx lookup <name>` | Explain one entity and its dependencies |
//! | `chx deps <path-or-name>` | Entities referenced by a config document |
//! | `chx stats` | Index statistics |
//! | `chx serve` | Start the HTTP server |
//! | `chx completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! chx init
//! chx index --progress human
//! chx query "list all entities" --retrieve-only
//! chx query "how is the order total computed?" --kind member --top-k 5
//! RUST_LOG=code_harness=debug chx lookup OrderService
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use code_harness::ask::{self, AskArgs};
use code_harness::config;
use code_harness::index::{self, IndexOptions};
use code_harness::migrate;
use code_harness::progress::ProgressMode;
use code_harness::server;
use code_harness::stats;

/// Code Harness CLI: ask natural-language questions about a codebase.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Code Harness: ask natural-language questions about a codebase",
    version,
    long_about = "Code Harness indexes Java sources, configuration files and prose documents \
    into retrieval units, then answers questions with hybrid (semantic + keyword) retrieval \
    and a generation model grounded in the retrieved code."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./chx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the configuration file and database schema.
    ///
    /// Writes a default `chx.toml` when the config path does not exist.
    /// Safe to run more than once.
    Init,

    /// Index the configured source tree.
    ///
    /// Walks `[index].root`, parses Java files, chunks every artifact,
    /// embeds the units (when an embedding provider is configured) and
    /// stores them. Units of deleted or changed files are replaced.
    Index {
        /// Show counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Remove everything stored before indexing.
        #[arg(long)]
        reset: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer a question from the index.
    Query {
        /// The question.
        question: String,

        #[command(flatten)]
        opts: QueryFlags,

        /// Print retrieved sources without calling the generation model.
        #[arg(long)]
        retrieve_only: bool,
    },

    /// Ask questions interactively. Earlier turns are sent as context.
    Chat {
        #[command(flatten)]
        opts: QueryFlags,
    },

    /// Explain an entity: all of its units, dependencies and references.
    Lookup {
        /// Entity name (`OrderService` or `Outer.Inner`).
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// List the entities a configuration document references.
    Deps {
        /// Config file path (relative to the index root) or document name.
        target: String,

        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Retrieval overrides shared by `query` and `chat`.
#[derive(clap::Args)]
struct QueryFlags {
    /// Number of sources to retrieve (overrides the intent policy).
    #[arg(long)]
    top_k: Option<usize>,

    /// Only retrieve units of this language (`java`, `json`, `markdown`, ...).
    #[arg(long)]
    language: Option<String>,

    /// Only retrieve units of this kind (`entity`, `member`, ...).
    #[arg(long)]
    kind: Option<String>,

    /// Semantic search only, no keyword fusion.
    #[arg(long)]
    no_hybrid: bool,

    /// Print the full response as JSON.
    #[arg(long)]
    json: bool,

    /// Status output on stderr. Defaults to `human` on a TTY.
    #[arg(long, value_enum)]
    progress: Option<ProgressMode>,
}

impl QueryFlags {
    fn ask_args(&self, retrieve_only: bool) -> AskArgs {
        AskArgs {
            top_k: self.top_k,
            language: self.language.clone(),
            kind: self.kind.clone(),
            no_hybrid: self.no_hybrid,
            retrieve_only,
            json: self.json,
        }
    }

    fn progress(&self) -> ProgressMode {
        match (self.progress, self.json) {
            (Some(mode), _) => mode,
            (None, true) => ProgressMode::Off,
            (None, false) => ProgressMode::default_for_tty(),
        }
    }
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, config::default_config_toml()?)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "chx", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Init => write_default_config(&cli.config)?,
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            dry_run,
            reset,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index::run_index_command(&cfg, IndexOptions { dry_run, reset }, progress).await?;
        }
        Commands::Query {
            question,
            opts,
            retrieve_only,
        } => {
            let observer = opts.progress().observer();
            ask::run_query(&cfg, &question, &opts.ask_args(retrieve_only), observer).await?;
        }
        Commands::Chat { opts } => {
            let observer = opts.progress().observer();
            ask::run_chat(&cfg, &opts.ask_args(false), observer).await?;
        }
        Commands::Lookup { name, json } => {
            let mode = if json { ProgressMode::Off } else { ProgressMode::default_for_tty() };
            ask::run_lookup(&cfg, &name, json, mode.observer()).await?;
        }
        Commands::Deps { target, json } => {
            let mode = if json { ProgressMode::Off } else { ProgressMode::default_for_tty() };
            ask::run_deps(&cfg, &target, json, mode.observer()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { bind } => {
            server::run_server(&cfg, bind).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
