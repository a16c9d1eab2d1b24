//! # Commit Mirror CLI (`cmirror`)
//!
//! The `cmirror` binary mirrors a hosted repository's commit history into a
//! local (SQLite) or remote (PostgreSQL) store, one resumable sweep at a
//! time.
//!
//! ## Usage
//!
//! ```bash
//! cmirror --config ./config/cmirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cmirror` / `cmirror menu` | Interactive menu with the four actions |
//! | `cmirror init` | Create the store schema |
//! | `cmirror initial` | Fill `[start_date, oldest)`; rerun to continue |
//! | `cmirror catch-up [--yes]` | Fetch commits newer than the newest stored one |
//! | `cmirror extend --boundary <date>` | Extend coverage back to `<date>` |
//! | `cmirror stats` | Count and date range of stored commits |
//!
//! ## Examples
//!
//! ```bash
//! # First run against the local store
//! GITHUB_TOKENS=ghp_a,ghp_b cmirror initial
//!
//! # Pick up new commits on the remote store without prompting
//! cmirror --store remote catch-up --yes
//!
//! # Reach further back in history
//! cmirror extend --boundary 2017-01-01T00:00:00Z
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commit_mirror::config::{self, Config, StoreBackend};
use commit_mirror::github::GitHubSource;
use commit_mirror::ingest::{run_mode, IngestSettings, Ingestor, ModeError, RunOutcome};
use commit_mirror::interrupt::Interrupt;
use commit_mirror::menu::{print_interrupted, Menu, MenuExit};
use commit_mirror::progress::{format_hms, ProgressMode};
use commit_mirror::{db, migrate, stats};

/// Commit Mirror CLI: incrementally mirror a repository's commit history.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cmirror.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cmirror",
    about = "Incrementally mirror a hosted repository's commit history into a document store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cmirror.toml")]
    config: PathBuf,

    /// Store to use, overriding `[store].backend`.
    #[arg(long, global = true, value_enum)]
    store: Option<StoreBackend>,

    /// Log filter when `RUST_LOG` is unset (e.g. `debug`, `warn`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default).
    Menu,

    /// Initialize the store schema.
    ///
    /// Creates the `commits` table and its date index. Idempotent.
    Init,

    /// Initial ingestion, or continue an interrupted one.
    ///
    /// Sweeps `[start_date, oldest stored)` until upstream runs dry.
    Initial,

    /// Fetch commits newer than the newest stored one.
    ///
    /// Only safe once the initial ingestion has completed: a gap left
    /// below the newest stored commit is never filled afterwards.
    CatchUp {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Extend coverage back to an earlier date.
    Extend {
        /// Earliest commit date to reach, as `YYYY-MM-DDTHH:MM:SSZ`.
        #[arg(long)]
        boundary: String,
    },

    /// Show count and date range of stored commits.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .format_timestamp_secs()
        .init();

    let cfg = config::load_config(&cli.config)?;
    let backend = cli.store.unwrap_or(cfg.store.backend);

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Init => {
            migrate::run_migrations(&cfg, backend).await?;
            println!("Store initialized successfully.");
        }
        Commands::Stats => {
            let store = db::open_store(&cfg, backend).await?;
            stats::run_stats(store.as_ref(), cfg.project_id()).await?;
        }
        Commands::Menu => {
            let (ingestor, interrupt) = build_ingestor(&cfg, backend).await?;
            interrupt.listen_ctrl_c();
            let mut menu = Menu::new(
                &ingestor,
                &cfg.ingest.elapsed_file,
                tokio::io::BufReader::new(tokio::io::stdin()),
                std::io::stdout(),
            );
            if menu.run().await? == MenuExit::Interrupted {
                // The stdin reader may still be parked in a blocking read,
                // which would hold the runtime open on shutdown.
                std::io::stdout().flush()?;
                std::process::exit(0);
            }
        }
        Commands::Initial => {
            let (ingestor, interrupt) = build_ingestor(&cfg, backend).await?;
            interrupt.listen_ctrl_c();
            let outcome = run_mode(&ingestor, &cfg.ingest.elapsed_file, ingestor.initial()).await;
            report(outcome)?;
        }
        Commands::CatchUp { yes } => {
            let (ingestor, interrupt) = build_ingestor(&cfg, backend).await?;
            // Nothing to confirm against an empty store.
            if ingestor.store().newest(ingestor.project_id()).await?.is_none() {
                eprintln!("{}", ModeError::EmptyStore(ingestor.project_id().to_string()));
                return Ok(());
            }
            let confirmed = yes || confirm_catch_up()?;
            interrupt.listen_ctrl_c();
            let outcome = run_mode(
                &ingestor,
                &cfg.ingest.elapsed_file,
                ingestor.catch_up(confirmed),
            )
            .await;
            report(outcome)?;
        }
        Commands::Extend { boundary } => {
            let (ingestor, interrupt) = build_ingestor(&cfg, backend).await?;
            interrupt.listen_ctrl_c();
            let outcome = run_mode(
                &ingestor,
                &cfg.ingest.elapsed_file,
                ingestor.extend_backward_from_input(&boundary),
            )
            .await;
            report(outcome)?;
        }
    }

    Ok(())
}

async fn build_ingestor(cfg: &Config, backend: StoreBackend) -> Result<(Ingestor, Interrupt)> {
    let store = db::open_store(cfg, backend).await?;
    let source = Arc::new(GitHubSource::from_config(cfg)?);
    let progress = ProgressMode::from_setting(cfg.ingest.progress.as_deref()).reporter();
    let interrupt = Interrupt::new();

    let ingestor = Ingestor::new(source, store, IngestSettings::from_config(cfg)?)
        .with_progress(Arc::from(progress))
        .with_interrupt(interrupt.clone());
    Ok((ingestor, interrupt))
}

fn confirm_catch_up() -> Result<bool> {
    eprintln!(
        "WARNING: if the initial ingestion has not completed, catching up now \
         leaves a gap that no later run will fill."
    );
    eprint!("Are you sure you want to continue? (yes/no): ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "yes" | "y"))
}

/// Print how a mode ended. Operator faults are reported, not propagated.
fn report(outcome: Result<RunOutcome>) -> Result<()> {
    match outcome {
        Ok(RunOutcome::Completed {
            report,
            elapsed_secs,
        }) => {
            println!("{}", report);
            println!("Completed in {}", format_hms(elapsed_secs as u64));
            Ok(())
        }
        Ok(RunOutcome::Interrupted {
            report,
            stored,
            estimate,
            elapsed_secs,
        }) => print_interrupted(
            &mut std::io::stdout(),
            report.as_ref(),
            stored,
            estimate,
            elapsed_secs,
        ),
        Err(e) => match e.downcast_ref::<ModeError>() {
            Some(mode_error) => {
                eprintln!("{}", mode_error);
                Ok(())
            }
            None => Err(e),
        },
    }
}
