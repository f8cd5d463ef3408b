//! Daokit CLI - run statements through a resilient connection

use clap::{Parser, Subcommand};
use daokit::config::{self, DaoConfig, DialectKind};
use daokit::connection::{ResilientConnection, TracingSink};
use daokit::storage::SqliteDriver;
use daokit::ui::{self, Icons};
use daokit::Statement;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "daokit")]
#[command(version)]
#[command(about = "Resilient DAO persistence engine - change-tracked records over a self-healing connection")]
#[command(long_about = r#"
Daokit runs statements through a connection that retries, reconnects and
recycles itself within a bounded budget.

Example usage:
  daokit init --database app.db
  daokit exec "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)"
  daokit query "SELECT * FROM users"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./daokit.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with default settings
    Init {
        /// Database file to record in the config
        #[arg(short, long)]
        database: Option<String>,

        /// Statement dialect of the store
        #[arg(long, value_enum, default_value = "sqlite")]
        dialect: DialectKind,

        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Execute a write statement and report affected rows
    Exec {
        /// Statement text
        sql: String,

        /// Database file (overrides the config)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Run a query and print the result rows
    Query {
        /// Statement text
        sql: String,

        /// Database file (overrides the config)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Init { database, dialect, force } => {
            let config = DaoConfig {
                database,
                dialect,
                ..DaoConfig::default()
            };
            config::write_config(&config_path, &config, force)?;
            ui::success(&format!("Wrote {}", config_path.display()));
        }

        Commands::Config => {
            let loaded = config::load_config(Some(&config_path))?;
            let source = if loaded.is_some() {
                config_path.display().to_string()
            } else {
                ui::dim("(built-in defaults)")
            };
            let config = loaded.unwrap_or_default();

            ui::header("Effective configuration");
            ui::info("Source", &source);
            println!("{}", ui::settings_table(&config));
        }

        Commands::Exec { sql, database } => {
            let config = config::load_config(Some(&config_path))?.unwrap_or_default();
            let mut conn = open_connection(&config, database.as_deref())?;

            match conn.run_query(&Statement::raw(sql)) {
                Ok(affected) => {
                    ui::success(&format!("{} row(s) affected", affected));
                    if let Some(id) = conn.last_insert_id() {
                        ui::summary_row("Last insert id", &id.to_string());
                    }
                    report_retries(conn.last_retry_count());
                }
                Err(e) => {
                    ui::error(&e.to_string());
                    std::process::exit(1);
                }
            }
            conn.disconnect();
        }

        Commands::Query { sql, database } => {
            let config = config::load_config(Some(&config_path))?.unwrap_or_default();
            let mut conn = open_connection(&config, database.as_deref())?;

            match conn.fetch_results(&Statement::raw(sql)) {
                Ok(rows) if rows.is_empty() => {
                    println!("{} {}", Icons::EMPTY, ui::muted("No rows."));
                    report_retries(conn.last_retry_count());
                }
                Ok(rows) => {
                    println!("{}", ui::rows_table(&rows));
                    ui::summary_row("Rows", &rows.len().to_string());
                    report_retries(conn.last_retry_count());
                }
                Err(e) => {
                    ui::error(&e.to_string());
                    std::process::exit(1);
                }
            }
            conn.disconnect();
        }

        Commands::Version => {
            println!("daokit {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Connection to the configured SQLite database
fn open_connection(config: &DaoConfig, database: Option<&Path>) -> anyhow::Result<ResilientConnection<SqliteDriver>> {
    if config.dialect != DialectKind::Sqlite {
        anyhow::bail!(
            "the {} dialect has no bundled driver; only sqlite databases can be opened from the CLI",
            config.dialect.as_str()
        );
    }

    let path = database
        .map(Path::to_path_buf)
        .or_else(|| config.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("daokit.db"));
    tracing::debug!("Opening {}", path.display());
    ui::info(&format!("{} Database", Icons::DATABASE), &path.display().to_string());

    let mut conn = ResilientConnection::new(SqliteDriver::open(path), config.connection.clone())
        .with_metrics(Arc::new(TracingSink));
    conn.connect()?;
    Ok(conn)
}

fn report_retries(retries: u32) {
    if retries > 0 {
        ui::warn(&format!("{} Succeeded after {} retries", Icons::RETRY, retries));
    }
}
