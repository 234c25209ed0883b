//! mysql-mssql-migrate CLI - MySQL to SQL Server table migration.

use clap::{Parser, Subcommand};
use mysql_mssql_migrate::{Config, MigrateError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mysql-mssql-migrate")]
#[command(about = "MySQL to SQL Server table migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing target tables from the source schema
    CopySchema,

    /// Truncate target tables and copy source rows in batches
    Copy {
        /// Copy a single table; any failure ends the run with an error
        #[arg(long, conflicts_with = "tables")]
        table: Option<String>,

        /// Comma-separated tables to copy (default: migration.tables, or all)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<u64>,
    },

    /// Insert source rows missing from the target table (set reconciliation)
    Sync {
        /// Table to synchronize (default: sync.table)
        #[arg(long)]
        table: Option<String>,

        /// Comma-separated columns to compare (default: sync.columns)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::CopySchema => {
            let orchestrator = Orchestrator::connect(&config).await?;
            let result = orchestrator.copy_schema().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nSchema copy completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Created: {}", result.created_tables.len());
                for name in &result.created_tables {
                    println!("    {}", name);
                }
                if !result.existing_tables.is_empty() {
                    println!("  Already present: {:?}", result.existing_tables);
                }
            }
        }
        Commands::Copy {
            table,
            tables,
            batch_size,
        } => {
            // Apply overrides
            if let Some(size) = batch_size {
                config.migration.batch_size = size;
            }
            if !tables.is_empty() {
                config.migration.tables = tables;
            }
            config.validate()?;

            let orchestrator = Orchestrator::connect(&config).await?;

            if let Some(name) = table {
                let job = orchestrator.copy_table(&name).await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    println!("\nTable {} copied!", job.table);
                    println!("  Rows: {}/{}", job.copied_row_count, job.total_row_count);
                    println!("  Skipped: {}", job.skipped_row_count);
                }
                return Ok(());
            }

            let result = orchestrator.run().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration {}!", result.status);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Tables: {}/{}",
                    result.tables_success,
                    result.jobs.len()
                );
                println!("  Rows: {}", result.rows_copied);
                println!("  Skipped rows: {}", result.rows_skipped);
                println!("  Throughput: {} rows/sec", result.rows_per_second);
                if !result.skipped_tables.is_empty() {
                    println!("  Skipped tables: {:?}", result.skipped_tables);
                }
                if !result.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", result.failed_tables);
                }
            }

            if !result.failed_tables.is_empty() {
                return Err(MigrateError::transfer(
                    result.failed_tables.join(", "),
                    "one or more tables failed",
                ));
            }
        }
        Commands::Sync { table, columns } => {
            let defaults = config.sync.clone().unwrap_or_default();
            let table = table.unwrap_or(defaults.table);
            let columns = if columns.is_empty() {
                defaults.columns
            } else {
                columns
            };
            if table.is_empty() {
                return Err(MigrateError::Config(
                    "sync needs a table (--table or sync.table)".into(),
                ));
            }
            if columns.is_empty() {
                return Err(MigrateError::Config(
                    "sync needs columns (--columns or sync.columns)".into(),
                ));
            }

            let orchestrator = Orchestrator::connect(&config).await?;
            let report = orchestrator.sync_table(&table, &columns).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nSynchronization completed!");
                println!("  Table: {}", report.table);
                println!("  Identical rows: {}", report.identical);
                println!("  Inserted rows: {}", report.inserted);
                println!(
                    "  Target rows: {} -> {}",
                    report.count_before, report.count_after
                );
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
