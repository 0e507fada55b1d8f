//! datamigrate CLI - export, handle, import and re-seed MySQL data corpora.

use clap::{Parser, Subcommand};
use datamigrate::{
    AutoIncrementOptions, AutoIncrementPlanner, Config, ConflictStrategy, ExportEngine,
    ExportOptions, HandleEngine, HandleOptions, ImportEngine, ImportOptions, MigrateError,
    MysqlExecutor,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "datamigrate")]
#[command(about = "Move MySQL data between environments through a JSON corpus")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "datamigrate.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export models from the database into a corpus
    Export {
        /// Model or app label to export (repeatable); defaults to export.default_models
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Output directory, or a path ending in .zip
        #[arg(short, long)]
        out: PathBuf,

        /// Do not create files for models with no rows (default)
        #[arg(long, conflicts_with = "write_empty_file")]
        skip_empty_file: bool,

        /// Create a payload with empty data for models with no rows
        #[arg(long)]
        write_empty_file: bool,

        /// Apply transformer chains and global pipelines while exporting
        #[arg(long)]
        enable_handle: bool,

        /// Rows per page (overrides export.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Transform a corpus offline
    Handle {
        /// Input corpus directory or .zip
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory, or a path ending in .zip
        #[arg(short, long)]
        out: PathBuf,

        /// Partition rows into one directory per business
        #[arg(long)]
        split_by_biz: bool,

        /// Comma-separated business ids whose rows are dropped (non-bkcc ids are negative)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        exclude_biz_ids: Vec<i64>,

        /// Run the pipeline and report without writing output
        #[arg(long)]
        dry_run: bool,
    },

    /// Import a corpus into the database
    Import {
        /// Input corpus directory or .zip
        #[arg(short, long)]
        input: PathBuf,

        /// Conflict strategy for existing unique keys: update or skip
        #[arg(long, default_value = "update", value_parser = parse_conflict)]
        conflict: ConflictStrategy,

        /// Classify rows without writing
        #[arg(long)]
        dry_run: bool,

        /// Rows per transaction (overrides import.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Raise AUTO_INCREMENT seeds above the imported row counts
    SetAutoIncrement {
        /// Input corpus directory or .zip
        #[arg(short, long)]
        input: PathBuf,

        /// Print the ALTER statements without running them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Export {
            models,
            out,
            skip_empty_file: _,
            write_empty_file,
            enable_handle,
            batch_size,
        } => {
            let schema = config.load_manifest()?;
            let mut executor = MysqlExecutor::connect(config.database()?).await?;
            let options = ExportOptions {
                models,
                out,
                write_empty_file,
                enable_handle,
                batch_size,
            };
            let result = ExportEngine::new(&config, &schema)
                .run(&mut executor, &options)
                .await;
            executor.close().await?;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nExport completed!");
                println!("  Output: {}", result.output.display());
                println!("  Duration: {:.2}s", result.duration_seconds);
                for model in &result.models {
                    println!(
                        "  {:<8} {} ({} rows, {} filtered)",
                        model.status, model.model, model.rows, model.filtered
                    );
                }
                println!("  Rows: {}", result.rows_exported);
                if !result.failed_models.is_empty() {
                    println!("  Failed models: {:?}", result.failed_models);
                }
            }

            Ok(failure_code(&result.failed_models))
        }

        Commands::Handle {
            input,
            out,
            split_by_biz,
            exclude_biz_ids,
            dry_run,
        } => {
            let options = HandleOptions {
                input,
                out,
                split_by_biz,
                exclude_biz_ids: exclude_biz_ids.into_iter().collect::<BTreeSet<_>>(),
                dry_run,
            };
            let result = HandleEngine::new(&config).run(&options)?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if dry_run { "Dry run completed!" } else { "Handle completed!" };
                println!("\n{}", status_msg);
                println!("  Output: {}", result.output.display());
                println!("  Duration: {:.2}s", result.duration_seconds);
                for model in &result.models {
                    println!(
                        "  {:<8} {} ({} -> {} rows)",
                        model.status, model.model, model.rows_in, model.rows_out
                    );
                }
                println!("  Rows: {} -> {}", result.rows_in, result.rows_out);
                if !result.fallback_models.is_empty() {
                    println!("  Kept original rows: {:?}", result.fallback_models);
                }
            }

            // Fallbacks are recovered errors; the corpus is complete.
            Ok(ExitCode::SUCCESS)
        }

        Commands::Import {
            input,
            conflict,
            dry_run,
            batch_size,
        } => {
            let schema = config.load_manifest()?;
            let mut executor = MysqlExecutor::connect(config.database()?).await?;
            let options = ImportOptions {
                input,
                conflict,
                dry_run,
                batch_size,
            };
            let result = ImportEngine::new(&config, &schema)
                .run(&mut executor, &options)
                .await;
            executor.close().await?;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if dry_run { "Dry run completed!" } else { "Import completed!" };
                println!("\n{} (conflict: {})", status_msg, result.conflict);
                println!("  Duration: {:.2}s", result.duration_seconds);
                for model in &result.models {
                    let stats = &model.stats;
                    println!(
                        "  {:<8} {} (total: {}, inserted: {}, updated: {}, skipped: {}, failed: {})",
                        model.status,
                        stats.model,
                        stats.total,
                        stats.inserted,
                        stats.updated,
                        stats.skipped,
                        stats.failed
                    );
                }
                if !result.failed_models.is_empty() {
                    println!("  Failed models: {:?}", result.failed_models);
                }
            }

            if result.rows_failed > 0 {
                info!("{} rows failed to import", result.rows_failed);
            }
            Ok(failure_code(&result.failed_models))
        }

        Commands::SetAutoIncrement { input, dry_run } => {
            let schema = config.load_manifest()?;
            let mut executor = MysqlExecutor::connect(config.database()?).await?;
            let options = AutoIncrementOptions { input, dry_run };
            let result = AutoIncrementPlanner::new(&schema)
                .run(&mut executor, &options)
                .await;
            executor.close().await?;
            let result = result?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nAuto-increment seeds (totals from {:?}):", result.source);
                for plan in &result.plans {
                    let current = plan
                        .current
                        .map_or_else(|| "-".to_string(), |c| c.to_string());
                    let target = plan
                        .target
                        .map_or_else(|| "-".to_string(), |t| t.to_string());
                    println!(
                        "  {} {}: rows {}, current {}, target {} ({:?})",
                        plan.model, plan.table, plan.total_rows, current, target, plan.action
                    );
                    if dry_run {
                        if let Some(ref statement) = plan.statement {
                            println!("    {}", statement);
                        }
                    }
                }
            }

            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_conflict(value: &str) -> Result<ConflictStrategy, String> {
    value.parse().map_err(|e: MigrateError| e.to_string())
}

/// Exit code for a command that finished with per-model failures.
fn failure_code(failed_models: &[String]) -> ExitCode {
    if failed_models.is_empty() {
        ExitCode::SUCCESS
    } else {
        eprintln!("Error: {} model(s) failed: {}", failed_models.len(), failed_models.join(", "));
        ExitCode::FAILURE
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}
