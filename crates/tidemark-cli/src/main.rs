mod db;
mod scaffold;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidemark_common::Error;
use tidemark_config::{AppConfig, ConfigLoader};
use tidemark_db::{MigrationStatus, Migrator, StatusReport};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::db::{Connection, DatabaseUrl};

#[derive(Parser)]
#[command(name = "tidemark", version, about = "Apply and roll back SQL schema migrations")]
struct Cli {
    /// Config file (defaults to tidemark.yml / tidemark.yaml / tidemark.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL: sqlite://app.db or postgres://user@host/db.
    /// mysql:// URLs are recognised but no MySQL driver is built in.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Migrations directory
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema_migrations table
    Init,
    /// Apply all pending migrations
    Up,
    /// Roll back the most recently applied migrations
    Down {
        /// How many migrations to roll back
        #[arg(short = 'n', long, default_value_t = 1)]
        steps: usize,
    },
    /// Show applied and pending migrations
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create an empty up/down migration pair
    Create {
        /// Migration name, e.g. "add email to users"
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(url) = cli.database_url.clone() {
        config.database.url = Some(url);
    }
    if let Some(dir) = cli.dir.clone() {
        config.migrations.dir = dir;
    }
    config.log.json |= cli.json_logs;

    init_tracing(&config);

    match cli.command {
        Command::Create { name } => {
            let created = scaffold::create_migration(
                &config.migrations.dir,
                &name,
                config.migrations.version_width,
            )
            .context("failed to create migration files")?;
            println!("Created migration {}:", created.version);
            println!("  {}", created.up.display());
            println!("  {}", created.down.display());
            Ok(())
        }
        Command::Init => with_migrator(&config, false, |migrator| {
            migrator.ensure_schema()?;
            println!("Migrations table ready ({})", migrator.dialect());
            Ok(())
        }),
        Command::Up => with_migrator(&config, true, |migrator| {
            let applied = migrator.apply_all()?;
            if applied.is_empty() {
                println!("Nothing to apply; database is up to date");
            } else {
                println!("Applied {} migration(s): {}", applied.len(), join(&applied));
            }
            Ok(())
        }),
        Command::Down { steps } => with_migrator(&config, true, |migrator| {
            match migrator.rollback(steps) {
                Ok(reverted) => println!(
                    "Rolled back {} migration(s): {}",
                    reverted.len(),
                    join(&reverted)
                ),
                Err(Error::NothingToRollback) => {
                    warn!("rollback requested but nothing is applied");
                    println!("Nothing to roll back");
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }),
        Command::Status { json } => with_migrator(&config, true, |migrator| {
            let report = migrator.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
            Ok(())
        }),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    if config.log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Open the configured database and run `f` against a migrator for it,
/// loading the migrations directory first when `load` is set.
fn with_migrator(
    config: &AppConfig,
    load: bool,
    f: impl FnOnce(&mut Migrator<'_>) -> Result<()>,
) -> Result<()> {
    let raw_url = config.database.url.as_deref().context(
        "database URL is required (--database-url, TIDEMARK_DATABASE_URL or config file)",
    )?;
    let url = DatabaseUrl::parse(raw_url)?;
    let mut conn = Connection::open(&url)?;
    let dialect = conn.dialect();
    let mut migrator = Migrator::new(conn.as_database(), dialect);

    if load {
        let dir = &config.migrations.dir;
        migrator
            .load_catalog(dir)
            .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
        debug!("loaded {} migration(s)", migrator.catalog().len());
    }

    f(&mut migrator)
}

fn print_status(report: &StatusReport) {
    if report.migrations.is_empty() && report.orphaned.is_empty() {
        println!("No migrations found");
        return;
    }

    let name_w = report
        .migrations
        .iter()
        .map(|m| m.name.len())
        .chain(report.orphaned.iter().map(|r| r.name.len()))
        .max()
        .unwrap_or(4)
        .max(4);

    println!("{:>8}  {:<name_w$}  STATUS", "VERSION", "NAME");
    for entry in &report.migrations {
        let status = match &entry.status {
            MigrationStatus::Pending => "pending".to_string(),
            MigrationStatus::Applied { applied_at } => {
                format!("applied {}", applied_at.format("%Y-%m-%d %H:%M:%S%.6f UTC"))
            }
        };
        println!("{:>8}  {:<name_w$}  {status}", entry.version, entry.name);
    }
    for record in &report.orphaned {
        println!(
            "{:>8}  {:<name_w$}  applied {} (no migration file)",
            record.version,
            record.name,
            record.applied_at.format("%Y-%m-%d %H:%M:%S%.6f UTC")
        );
    }
    println!();
    println!("{} pending", report.pending_count());
}

fn join(versions: &[u64]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
