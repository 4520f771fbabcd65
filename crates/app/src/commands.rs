use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_core::AccountId;
use tally_import::{ImportConfig, ImportOptions, ImportPipeline, ImportStats, VersionPreview};
use tally_storage::SqliteStore;

use crate::cli::{Cli, Commands, RegistryCommands};

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "tally", "Tally").context("Cannot determine the home directory")
}

/// An explicit path must exist; the default location is optional.
fn load_config(explicit: Option<&Path>) -> Result<ImportConfig> {
    if let Some(path) = explicit {
        return ImportConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let path = project_dirs()?.config_dir().join("tally.toml");
    if !path.exists() {
        tracing::debug!("no config at {}, using an empty one", path.display());
        return Ok(ImportConfig::default());
    }
    ImportConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn database_path(config: &ImportConfig) -> Result<PathBuf> {
    if let Some(path) = &config.database {
        return Ok(path.clone());
    }
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    Ok(data_dir.join("tally.db"))
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_stats(stats: &ImportStats) {
    let version = stats.version.as_deref().unwrap_or("-");
    println!(
        "{} imported, {} duplicates, {} errors (version {version})",
        stats.imported, stats.duplicates, stats.errors
    );
    if stats.categorized > 0 {
        println!("{} categorized", stats.categorized);
    }
    for detail in &stats.error_details {
        if detail.row == 0 {
            println!("  file: {}", detail.reason);
        } else {
            println!("  line {}: {}", detail.row, detail.reason);
        }
    }
    for warning in &stats.warnings {
        println!("warning: {warning}");
    }
}

fn print_preview(preview: &VersionPreview) {
    println!("{} -> version {}", preview.format, preview.version);
    println!("headers: {}", preview.headers.join(", "));
    if preview.missing.is_empty() {
        println!("all mapped fields present");
    } else {
        for missing in &preview.missing {
            println!("missing: {missing}");
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let db_path = database_path(&config)?;
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );
    let json = cli.json;

    match cli.command {
        Commands::Import {
            file,
            format,
            account,
            no_automation,
        } => {
            let pipeline = ImportPipeline::from_config(store, config);
            let options = ImportOptions {
                apply_automation: !no_automation,
            };
            let stats = pipeline
                .import_file(&file, &format, AccountId(account), options)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            emit(json, &stats, print_stats)?;
            if let Some(reason) = &stats.file_error {
                bail!("{} was not imported: {reason}", file.display());
            }
        }
        Commands::Detect { file, format } => {
            let pipeline = ImportPipeline::from_config(store, config);
            let preview = pipeline.resolve_file_version(&file, &format).await?;
            emit(json, &preview, print_preview)?;
        }
        Commands::Categorize { account } => {
            let pipeline = ImportPipeline::from_config(store, config);
            for warning in pipeline.rules().warnings() {
                eprintln!("warning: {warning}");
            }
            let stats = pipeline
                .recategorize_uncategorized(account.map(AccountId))
                .await?;
            emit(json, &stats, |s| {
                for warning in &s.warnings {
                    eprintln!("warning: {warning}");
                }
                println!(
                    "{} of {} uncategorized transactions categorized",
                    s.categorized, s.examined
                )
            })?;
        }
        Commands::Accounts { command } => match command {
            RegistryCommands::Add { name } => {
                let id = tally_storage::create_account(store.pool(), &name).await?;
                emit(json, &id, |id| println!("Added account {name} (id {id})"))?;
            }
            RegistryCommands::List => {
                let accounts = tally_storage::get_all_accounts(store.pool()).await?;
                emit(json, &accounts, |accounts| {
                    for a in accounts {
                        println!("{:>4}  {}", a.id, a.name);
                    }
                })?;
            }
        },
        Commands::Categories { command } => match command {
            RegistryCommands::Add { name } => {
                let id = tally_storage::create_category(store.pool(), &name).await?;
                emit(json, &id, |id| println!("Added category {name} (id {id})"))?;
            }
            RegistryCommands::List => {
                let categories = tally_storage::get_all_categories(store.pool()).await?;
                emit(json, &categories, |categories| {
                    for c in categories {
                        println!("{:>4}  {}", c.id, c.name);
                    }
                })?;
            }
        },
        Commands::History { limit } => {
            let batches = tally_storage::get_import_batches(store.pool(), limit).await?;
            emit(json, &batches, |batches| {
                for b in batches {
                    println!(
                        "{}  account {}  {}/{}  {} imported, {} duplicates, {} errors",
                        b.file_name,
                        b.account_id,
                        b.format,
                        b.version.as_deref().unwrap_or("-"),
                        b.imported,
                        b.duplicates,
                        b.errors
                    );
                }
            })?;
        }
    }

    Ok(())
}
