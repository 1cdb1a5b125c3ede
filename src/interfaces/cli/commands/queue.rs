//! Queue commands for cron usage

use std::sync::Arc;

use colored::Colorize;

use crate::config::get_config;
use crate::interfaces::cli::CliError;
use crate::runtime::lifetime::startup::prepare_startup;
use crate::services::QueueRetentionTask;
use crate::storage::{QueueStore, SeaOrmStorage};

/// 处理一个批次后退出
pub async fn process_queue(limit: Option<u64>) -> Result<(), CliError> {
    let startup = prepare_startup()
        .await
        .map_err(|e| CliError::StorageError(e.to_string()))?;

    let limit = limit.unwrap_or_else(|| startup.processor.config().batch_size);
    let report = startup.processor.run_batch(limit).await?;

    println!(
        "{} claimed {}, completed {}, retried {}, failed {}, skipped {}, reclaimed {}",
        "✓".bold().green(),
        report.claimed.to_string().cyan(),
        report.completed.to_string().green(),
        report.retried.to_string().yellow(),
        report.failed.to_string().red(),
        report.skipped,
        report.reclaimed
    );

    let counts = startup.storage.counts().await?;
    println!(
        "  queue: pending {}, processing {}, completed {}, failed {}",
        counts.pending, counts.processing, counts.completed, counts.failed
    );

    Ok(())
}

/// 删除过期的 completed / failed 条目
pub async fn cleanup_queue(storage: Arc<SeaOrmStorage>) -> Result<(), CliError> {
    let config = get_config();
    let task = QueueRetentionTask::new(storage, &config.queue);
    let report = task.run_cleanup().await?;

    println!(
        "{} Removed {} completed and {} failed entries",
        "✓".bold().green(),
        report.completed_deleted.to_string().cyan(),
        report.failed_deleted.to_string().cyan()
    );
    Ok(())
}
