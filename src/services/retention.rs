//! 队列清理任务
//!
//! 删除过期的 completed / failed 条目，防止队列表无限增长。
//! pending 与 processing 条目永远不会被删除。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tracing::{error, info};

use crate::config::QueueConfig;
use crate::errors::Result;
use crate::storage::models::PurgeReport;
use crate::storage::traits::QueueStore;

/// 首次清理前的延迟
const INITIAL_DELAY_SECS: u64 = 300;

pub struct QueueRetentionTask {
    queue: Arc<dyn QueueStore>,
    /// completed 条目保留天数
    completed_retention_days: u64,
    /// failed 条目保留天数
    failed_retention_days: u64,
}

impl QueueRetentionTask {
    pub fn new(queue: Arc<dyn QueueStore>, config: &QueueConfig) -> Self {
        Self {
            queue,
            completed_retention_days: config.completed_retention_days,
            failed_retention_days: config.failed_retention_days,
        }
    }

    pub async fn run_cleanup(&self) -> Result<PurgeReport> {
        let now = Utc::now();
        let completed_before = now - Duration::days(self.completed_retention_days as i64);
        let failed_before = now - Duration::days(self.failed_retention_days as i64);

        let report = self
            .queue
            .purge_finished(completed_before, failed_before)
            .await?;

        info!(
            "Queue cleanup completed: completed entries {}, failed entries {}",
            report.completed_deleted, report.failed_deleted
        );

        Ok(report)
    }

    /// 启动后台清理任务
    pub fn spawn_background_task(self: Arc<Self>, interval_hours: u64) {
        tokio::spawn(async move {
            let interval = StdDuration::from_secs(interval_hours.max(1) * 60 * 60);

            tokio::time::sleep(StdDuration::from_secs(INITIAL_DELAY_SECS)).await;

            loop {
                if let Err(e) = self.run_cleanup().await {
                    error!("Queue cleanup task failed: {}", e);
                }

                tokio::time::sleep(interval).await;
            }
        });

        info!(
            "Queue cleanup background task started (interval: {} hours)",
            interval_hours
        );
    }
}
