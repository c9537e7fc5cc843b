//! Command line front end for the bizvault data-management core.
//!
//! ```bash
//! bizvault health
//! bizvault put clients clients.json
//! bizvault queue clear-completed --days 30
//! bizvault backup create
//! bizvault backup restore <id> --yes
//! bizvault resolve invoices merge --yes
//! bizvault run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use bizvault::backup::{BackupError, BackupSettings};
use bizvault::config::AppConfig;
use bizvault::recovery::{ConflictPhase, ResolutionStrategy};
use bizvault::scheduler::PeriodicTask;
use bizvault::store::DataCategory;
use bizvault::sync::SyncError;
use bizvault::{init_logging, Services};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Business data storage, sync, backup and recovery.
#[derive(Parser)]
#[command(name = "bizvault", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every storage tier and report issues
    Health,

    /// Show how many categories wait for upload
    Pending,

    /// Upload queued changes now
    Sync,

    /// Maintain the upload queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Print the current data of a category
    Get { category: DataCategory },

    /// Replace a category with the JSON document in FILE
    Put { category: DataCategory, file: PathBuf },

    /// Manage backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show or change backup settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Check categories for local/remote conflicts
    Conflicts { category: Option<DataCategory> },

    /// Resolve a conflict: local, remote or merge
    Resolve {
        category: DataCategory,
        strategy: ResolutionStrategy,
        /// Confirm overwriting one side
        #[arg(long)]
        yes: bool,
    },

    /// Repair missing or corrupted local data
    Recover { category: Option<DataCategory> },

    /// Run automatic backups and upload polling until interrupted
    Run,
}

#[derive(Subcommand)]
enum BackupAction {
    List,
    Create,
    Restore {
        id: String,
        /// Confirm overwriting current data
        #[arg(long)]
        yes: bool,
    },
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Reset failed uploads so the next sync retries them
    Retry,
    /// Remove completed uploads older than DAYS
    ClearCompleted {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Remove uploads that exhausted their retries
    ClearFailed,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        /// Interval between automatic backups, in minutes
        #[arg(long)]
        interval_minutes: Option<u64>,
        #[arg(long)]
        local: Option<bool>,
        #[arg(long)]
        cloud: Option<bool>,
        #[arg(long)]
        auto_delete: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let services = match AppConfig::from_env().map_err(|e| e.to_string()).and_then(|config| {
        Services::open(config).map_err(|e| e.to_string())
    }) {
        Ok(services) => services,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            eprintln!("FATAL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Health => cmd_health(&services).await,
        Commands::Pending => cmd_pending(&services),
        Commands::Sync => cmd_sync(&services).await,
        Commands::Queue { action } => cmd_queue(&services, action),
        Commands::Get { category } => cmd_get(&services, category).await,
        Commands::Put { category, file } => cmd_put(&services, category, file).await,
        Commands::Backup { action } => cmd_backup(&services, action).await,
        Commands::Settings { action } => cmd_settings(&services, action),
        Commands::Conflicts { category } => cmd_conflicts(&services, category).await,
        Commands::Resolve {
            category,
            strategy,
            yes,
        } => cmd_resolve(&services, category, strategy, yes).await,
        Commands::Recover { category } => cmd_recover(&services, category).await,
        Commands::Run => cmd_run(services).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_confirmation(yes: bool, what: &str) -> CliResult {
    if yes {
        Ok(())
    } else {
        Err(format!("{} is destructive; re-run with --yes to confirm", what).into())
    }
}

async fn cmd_health(services: &Services) -> CliResult {
    let health = services.store.validate_health().await;
    print_json(&health)?;
    if !health.healthy {
        return Err("storage is unhealthy".into());
    }
    Ok(())
}

fn cmd_pending(services: &Services) -> CliResult {
    println!("Pending uploads: {}", services.sync.get_pending_sync_count());
    print_json(&services.sync.get_queue_stats()?)
}

async fn cmd_sync(services: &Services) -> CliResult {
    match services.sync.process_queue().await {
        Ok(result) => print_json(&result),
        Err(SyncError::RemoteNotConfigured) => {
            Err("no remote store configured (set BIZVAULT_REMOTE_URL)".into())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_queue(services: &Services, action: QueueAction) -> CliResult {
    match action {
        QueueAction::Retry => {
            let count = services.sync.retry_failed_syncs()?;
            println!("Reset {} failed uploads", count);
        }
        QueueAction::ClearCompleted { days } => {
            let count = services.sync.clear_completed_queue(days)?;
            println!("Removed {} completed uploads", count);
        }
        QueueAction::ClearFailed => {
            let count = services.sync.clear_failed_queue()?;
            println!("Removed {} failed uploads", count);
        }
    }
    Ok(())
}

async fn cmd_get(services: &Services, category: DataCategory) -> CliResult {
    match services.store.load(category).await? {
        Some(record) => print_json(&record),
        None => {
            println!("{} holds no data", category);
            Ok(())
        }
    }
}

async fn cmd_put(services: &Services, category: DataCategory, file: PathBuf) -> CliResult {
    let contents = tokio::fs::read_to_string(&file).await?;
    let data: serde_json::Value = serde_json::from_str(&contents)?;

    let record = services.sync.commit_local(category, data).await?;
    println!("Saved {} v{} (queued for upload)", category, record.version);
    Ok(())
}

async fn cmd_backup(services: &Services, action: BackupAction) -> CliResult {
    match action {
        BackupAction::List => print_json(&services.backups.get_backup_list()),
        BackupAction::Create => match services.backups.perform_backup().await {
            Ok(report) => {
                for failure in &report.failures {
                    eprintln!("warning: {}", failure);
                }
                print_json(&report.metadata)
            }
            Err(BackupError::AllFailed(failures)) => {
                for failure in &failures {
                    eprintln!("failed: {}", failure);
                }
                Err("Backup failed".into())
            }
            Err(e) => Err(e.into()),
        },
        BackupAction::Restore { id, yes } => {
            require_confirmation(yes, "Restoring a backup")?;
            let result = services.backups.restore_backup(&id).await;
            print_json(&result)?;
            if !result.success {
                return Err("restore incomplete".into());
            }
            Ok(())
        }
        BackupAction::Delete { id, yes } => {
            require_confirmation(yes, "Deleting a backup")?;
            services.backups.delete_backup(&id).await?;
            println!("Deleted backup {}", id);
            Ok(())
        }
    }
}

fn cmd_settings(services: &Services, action: SettingsAction) -> CliResult {
    match action {
        SettingsAction::Show => print_json(&services.backups.get_settings()),
        SettingsAction::Set {
            enabled,
            interval_minutes,
            local,
            cloud,
            auto_delete,
        } => {
            let current = services.backups.get_settings();
            let settings = BackupSettings {
                enabled: enabled.unwrap_or(current.enabled),
                interval: interval_minutes
                    .map(|m| m.saturating_mul(60_000))
                    .unwrap_or(current.interval),
                store_local: local.unwrap_or(current.store_local),
                store_cloud: cloud.unwrap_or(current.store_cloud),
                auto_delete_old_backups: auto_delete.unwrap_or(current.auto_delete_old_backups),
            };
            services.backups.update_settings(&settings)?;
            print_json(&settings)
        }
    }
}

async fn cmd_conflicts(services: &Services, category: Option<DataCategory>) -> CliResult {
    let detector = services.resolver.detector();
    match category {
        Some(category) => {
            let report = detector.inspect(category).await?;
            println!("{}: {}", category, report.divergence.as_str());
            Ok(())
        }
        None => print_json(&detector.check_all().await),
    }
}

async fn cmd_resolve(
    services: &Services,
    category: DataCategory,
    strategy: ResolutionStrategy,
    yes: bool,
) -> CliResult {
    let resolver = &services.resolver;

    if resolver.refresh(category).await? != ConflictPhase::ConflictDetected {
        println!("{} is not in conflict", category);
        return Ok(());
    }

    let report = resolver.begin_review(category).await?;
    for (side, record) in [("local", &report.local), ("remote", &report.remote)] {
        if let Some(record) = record {
            println!(
                "{}: v{} from {} at {}",
                side, record.version, record.origin, record.updated_at
            );
        }
    }

    if let Err(e) = require_confirmation(yes, "Resolving a conflict") {
        resolver.cancel_review(category)?;
        return Err(e);
    }

    let phase = resolver.resolve(category, strategy).await?;
    println!("{}: {}", category, phase);
    Ok(())
}

async fn cmd_recover(services: &Services, category: Option<DataCategory>) -> CliResult {
    match category {
        Some(category) => {
            let source = services.recovery.recover_data(category).await?;
            println!("{}: {}", category, source.as_str());
            Ok(())
        }
        None => {
            let result = services.recovery.full_recovery().await;
            print_json(&result)?;
            if !result.success {
                return Err("some categories could not be recovered".into());
            }
            Ok(())
        }
    }
}

async fn cmd_run(services: Services) -> CliResult {
    let sync = services.sync.clone();
    services.sync.add_listener(Arc::new(move || {
        log::info!("Pending uploads: {}", sync.get_pending_sync_count());
    }));

    let poll = services.sync.spawn_pending_poll(services.config.sync_poll_interval)?;

    let uploader = PeriodicTask::new("upload-queue");
    if services.store.remote().is_some() {
        let sync = services.sync.clone();
        uploader.start(services.config.sync_poll_interval, move || {
            let sync = sync.clone();
            async move {
                if let Err(e) = sync.process_queue().await {
                    log::warn!("Upload pass failed: {}", e);
                }
            }
        })?;
    }

    let auto_backup = services.auto_backup();
    auto_backup.start()?;

    log::info!("bizvault running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    auto_backup.shutdown().await?;
    if uploader.is_running() {
        uploader.stop_and_wait().await?;
    }
    poll.stop()?;

    let cache = services.store.cache_stats();
    log::info!(
        "Record cache: {} hits, {} misses ({:.1}% hit rate)",
        cache.hits,
        cache.misses,
        cache.hit_rate
    );
    log::info!("bizvault stopped");
    Ok(())
}
