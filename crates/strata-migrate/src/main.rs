//! strata CLI
//!
//! Command-line tool for checking, applying and repairing schema migrations.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use strata_db::{Config, Database, DbError, Engine, Registry};
use strata_migrate::prelude::*;

/// Snapshot-diffing schema migrations.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (e.g. `sqlite://app.db?mode=rwc`, `postgres://...`).
    #[arg(short, long, env = "DATABASE_URL")]
    database: Option<String>,

    /// Database engine, when it cannot be inferred from the URL.
    #[arg(long, env = "STRATA_ENGINE", value_parser = parse_engine)]
    engine: Option<Engine>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file declaring the models.
    #[arg(short, long, default_value = "models.json")]
    models: PathBuf,

    /// Snapshot directory.
    #[arg(long, default_value = "migrations")]
    migrations_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Propagate errors with full context instead of a one-line message.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes a migration would make.
    Check,

    /// Apply the changes and record a new snapshot.
    Migrate {
        /// Comment recorded with the snapshot.
        #[arg(short, long, default_value = "Untitled")]
        comment: String,

        /// Apply without asking for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Apply the column renames declared by the models.
    Repair {
        /// Comment recorded with the snapshot.
        #[arg(short, long, default_value = "Untitled")]
        comment: String,
    },

    /// Create the migrations table and every declared table.
    Init {
        /// Comment recorded with the snapshot.
        #[arg(short, long, default_value = "Untitled")]
        comment: String,
    },

    /// Drop every recorded table and initialize again.
    Reset {
        /// Reset without asking for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show recorded migrations.
    History,
}

fn parse_engine(s: &str) -> std::result::Result<Engine, String> {
    s.parse().map_err(|err: DbError| err.to_string())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match (&cli.config, &cli.database) {
        (Some(path), url) => {
            let mut config = Config::from_file(path)?;
            if let Some(url) = url {
                config.database_url.clone_from(url);
            }
            config
        }
        (None, Some(url)) => match cli.engine {
            Some(engine) => Config::new(engine, url.as_str()),
            None => Config::from_url(url.as_str())?,
        },
        (None, None) => anyhow::bail!("no database given; pass --database, set DATABASE_URL or use --config"),
    };
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }
    let debug = cli.debug || config.debug;
    Ok(config.with_debug(debug))
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_changes(report: &Report) {
    println!("\nPlanned changes:");
    println!("{:-<60}", "");
    for change in &report.changes {
        println!(" - {change}");
    }
    println!();
}

fn print_report(report: &Report) {
    for table in &report.healed {
        info!(table = %table, "healed leftover table");
    }
    for change in &report.changes {
        info!("{change}");
    }
    match &report.version {
        Some(version) => info!(%version, statements = report.statements.len(), "recorded snapshot"),
        None => info!("No changes detected."),
    }
}

async fn dispatch(cli: &Cli, db: &Database) -> anyhow::Result<()> {
    let options = MigratorOptions::default().migrations_dir(cli.migrations_dir.clone());

    match &cli.command {
        Commands::History => {
            let migrator = Migrator::new(db, Registry::new(), options);
            let records = migrator.history().await?;
            if records.is_empty() {
                info!("No migrations have been recorded yet.");
            } else {
                println!("\nRecorded migrations:");
                println!("{:-<60}", "");
                for record in &records {
                    println!(
                        " [{}] {} {} {}",
                        if record.current { "*" } else { " " },
                        record.version,
                        record.date,
                        record.comment.as_deref().unwrap_or("")
                    );
                }
                println!();
            }
        }

        Commands::Check => {
            let models = ModelFile::load(&cli.models)?;
            let migrator = Migrator::new(db, models.registry(), options);
            let report = migrator.check().await?;
            if report.changes.is_empty() {
                info!("No changes detected.");
            } else {
                print_changes(&report);
            }
        }

        Commands::Migrate { comment, yes } => {
            let models = ModelFile::load(&cli.models)?;
            let mut migrator = Migrator::new(db, models.registry(), options.comment(comment.as_str()));
            for table in migrator.heal().await? {
                info!(table = %table, "healed leftover table");
            }
            let preview = migrator.check().await?;
            if preview.changes.is_empty() {
                info!("No changes detected.");
                return Ok(());
            }
            print_changes(&preview);
            if !*yes && !confirm("Apply these changes?")? {
                info!("Aborted.");
                return Ok(());
            }
            print_report(&migrator.migrate().await?);
        }

        Commands::Repair { comment } => {
            let models = ModelFile::load(&cli.models)?;
            let registry = models.registry();
            let mut migrator = Migrator::new(db, registry, options.comment(comment.as_str())).with_rewriter(models);
            print_report(&migrator.repair().await?);
        }

        Commands::Init { comment } => {
            let models = ModelFile::load(&cli.models)?;
            let mut migrator = Migrator::new(db, models.registry(), options.comment(comment.as_str()));
            print_report(&migrator.init().await?);
        }

        Commands::Reset { yes } => {
            if !*yes && !confirm("Drop every recorded table and initialize again?")? {
                info!("Aborted.");
                return Ok(());
            }
            let models = ModelFile::load(&cli.models)?;
            let mut migrator = Migrator::new(db, models.registry(), options.confirm_reset(true));
            print_report(&migrator.reset().await?);
        }
    }
    Ok(())
}

async fn run(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let db = Database::connect(config).await?;
    let result = dispatch(cli, &db).await;
    db.close().await;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (debug, result) = match resolve_config(&cli) {
        Ok(config) => (config.debug, run(&cli, config).await),
        Err(err) => (cli.debug, Err(err)),
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if debug => Err(err),
        Err(err) => {
            println!("error: {err}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, debug: bool) -> PathBuf {
        let path = dir.path().join("strata.json");
        let json = serde_json::json!({
            "engine": "sqlite",
            "database_url": "sqlite::memory:",
            "debug": debug,
        });
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    #[test]
    fn test_debug_from_config_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, true);
        let cli = Cli::try_parse_from(["strata", "--config", path.to_str().unwrap(), "check"]).unwrap();
        assert!(!cli.debug);
        assert!(resolve_config(&cli).unwrap().debug);
    }

    #[test]
    fn test_debug_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, false);
        let cli =
            Cli::try_parse_from(["strata", "--config", path.to_str().unwrap(), "--debug", "history"]).unwrap();
        assert!(resolve_config(&cli).unwrap().debug);
    }

    #[test]
    fn test_url_without_config_file() {
        let cli = Cli::try_parse_from(["strata", "-d", "sqlite::memory:", "check"]).unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.engine, Engine::Sqlite);
        assert!(!config.debug);
    }
}
