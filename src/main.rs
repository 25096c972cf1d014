//! Database backup rotation tool
//!
//! Stores finished database dumps in a tiered tree (dumps, daily, weekly,
//! monthly, lastsnapshots) and rotates it by per-tier retention counts.

// dbrotate/src/main.rs
mod backup;
mod config;
mod errors;
mod rotate;
mod utils;

use anyhow::{Context, Result};
use backup::layout::GLOBAL_SUBDIR;
use config::AppConfig;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use utils::logging;

const DEFAULT_CONFIG_PATH: &str = "config.json";

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config_path = env::var_os("DBROTATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let app_config = match AppConfig::load_from_json(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "[{}] Failed to load configuration from {}: {:?}",
                logging::LOG_TAG,
                config_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(app_config.log_file.as_deref()) {
        eprintln!("[{}] {:?}", logging::LOG_TAG, e);
        return ExitCode::FAILURE;
    }

    let code = match run_app(&app_config) {
        Ok(()) => {
            tracing::info!("Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    };

    if let Some(log_file) = &app_config.log_file {
        if let Err(e) = logging::sanitize_log(log_file) {
            eprintln!("[{}] {:?}", logging::LOG_TAG, e);
            return ExitCode::FAILURE;
        }
    }
    code
}

fn run_app(app_config: &AppConfig) -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let choice = match args.first() {
        Some(arg) => arg.trim().to_string(),
        None => prompt_choice()?,
    };

    match choice.as_str() {
        "1" | "backup" => {
            let (dump, database) = match (args.get(1), args.get(2)) {
                (Some(dump), Some(database)) => (PathBuf::from(dump), database.clone()),
                (Some(dump), None) => (PathBuf::from(dump), GLOBAL_SUBDIR.to_string()),
                _ => prompt_backup_target()?,
            };
            tracing::info!("Storing {} for database {}", dump.display(), database);
            backup::run_backup_flow(app_config, &dump, &database).context("Backup process failed")?;
        }
        "2" | "rotate" => {
            tracing::info!("Rotating backups...");
            rotate::run_rotate_flow(app_config).context("Rotation failed")?;
        }
        "3" | "cleanup" => {
            tracing::info!("Cleaning up orphans...");
            rotate::run_cleanup_flow(app_config).context("Orphan cleanup failed")?;
        }
        _ => {
            anyhow::bail!(
                "Invalid operation choice '{}'. Use '1' (backup), '2' (rotate) or '3' (cleanup).",
                choice
            );
        }
    }
    Ok(())
}

/// Prompts user to select an operation
fn prompt_choice() -> Result<String> {
    println!("Select an operation:");
    println!("1. Store a dump (or type 'backup')");
    println!("2. Rotate backups (or type 'rotate')");
    println!("3. Clean up orphans (or type 'cleanup')");
    read_answer("Enter your choice: ")
}

fn prompt_backup_target() -> Result<(PathBuf, String)> {
    let dump = read_answer("Dump file: ")?;
    if dump.is_empty() {
        anyhow::bail!("A dump file is required");
    }
    let database = read_answer(&format!("Database name [{}]: ", GLOBAL_SUBDIR))?;
    if database.is_empty() {
        return Ok((PathBuf::from(dump), GLOBAL_SUBDIR.to_string()));
    }
    Ok((PathBuf::from(dump), database))
}

fn read_answer(prompt: &str) -> Result<String> {
    use std::io::{stdin, stdout, Write};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
