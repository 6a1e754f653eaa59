//! Command-line front end for converge.
//!
//! An application links this crate and hands [`main`] the function that
//! builds its declarations:
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     converge_cli::main("war-room-db", war_room_db::declarations)
//! }
//! ```
//!
//! Commands:
//! - `reconcile`: bring the database in line with the declarations
//! - `plan`: print the statements `reconcile` would run
//! - `schema`: print the declarations in reconciliation order

pub mod config;
mod output;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Overrides, Settings};
use converge::{Backend, Dialect, MemoryBackend, SchemaDeclaration};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Builds the declarations for a dialect, parents first.
pub type Declarations = fn(Dialect) -> Vec<SchemaDeclaration>;

/// Declarative schema reconciliation.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Database connection URL (overrides DATABASE_URL and the config file)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every table with its declaration
    Reconcile {
        /// Compute and print statements without running them
        #[arg(long)]
        dry_run: bool,

        /// Do not take the schema lock
        #[arg(long)]
        no_lock: bool,
    },
    /// Show the statements a reconcile would run
    Plan {
        /// Plan against an empty database instead of connecting
        #[arg(long, requires = "dialect")]
        offline: bool,

        /// SQL dialect for offline plans (mysql, postgres)
        #[arg(long)]
        dialect: Option<Dialect>,
    },
    /// Print the declared schema
    Schema {
        /// SQL dialect to declare for (mysql, postgres)
        #[arg(long, default_value = "mysql")]
        dialect: Dialect,
    },
}

/// Errors that stop a command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no database URL: pass --database-url, set DATABASE_URL, or add database_url to .config/converge.styx")]
    MissingDatabaseUrl,

    #[error("unsupported database URL scheme in `{0}`")]
    UnknownScheme(String),

    #[error(transparent)]
    Converge(#[from] converge::Error),
}

/// Parse arguments, run the command, and report failure through the exit code.
pub fn main(program: &str, declarations: Declarations) -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse_from(
        std::iter::once(program.to_string()).chain(std::env::args().skip(1)),
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, declarations)) {
        Ok(code) => code,
        Err(e) => {
            output::error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run one parsed command.
pub async fn run(cli: Cli, declarations: Declarations) -> Result<ExitCode, CliError> {
    let config = match config::load() {
        Ok((config, path)) => {
            tracing::debug!(%path, "loaded config");
            config
        }
        Err(ConfigError::NotFound) => Config::default(),
        Err(e) => return Err(e.into()),
    };

    match cli.command {
        Commands::Reconcile { dry_run, no_lock } => {
            let flags = Overrides {
                database_url: cli.database_url,
                dry_run,
                no_lock,
            };
            let settings = Settings::resolve(&config, &flags, |k| std::env::var(k).ok());
            let backend = open(&settings).await?;
            let decls = declarations(backend.dialect());

            let report = converge::reconcile_all(&backend, &decls, &settings.options).await?;
            output::report(&report);
            Ok(if report.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Plan { offline, dialect } => {
            let flags = Overrides {
                database_url: cli.database_url,
                dry_run: true,
                no_lock: true,
            };
            let settings = Settings::resolve(&config, &flags, |k| std::env::var(k).ok());
            let backend: Box<dyn Backend> = match (offline, dialect) {
                (true, Some(dialect)) => Box::new(MemoryBackend::new(dialect)),
                _ => open(&settings).await?,
            };
            let decls = declarations(backend.dialect());

            let report = converge::reconcile_all(&backend, &decls, &settings.options).await?;
            output::plan(&report);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Schema { dialect } => {
            let decls = declarations(dialect);
            let ordered = converge::dependency_order(&decls)?;
            output::schema(&ordered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open(settings: &Settings) -> Result<Box<dyn Backend>, CliError> {
    let url = settings
        .database_url
        .as_deref()
        .ok_or(CliError::MissingDatabaseUrl)?;
    if Dialect::from_url(url).is_none() {
        return Err(CliError::UnknownScheme(converge::mask_password(url)));
    }
    tracing::info!(database = %converge::mask_password(url), "connecting");
    Ok(converge::connect(url).await?)
}
