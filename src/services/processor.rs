//! 队列处理器
//!
//! 每个批次：先回收超时的 processing 条目，再按 created_at 领取 pending 条目逐条处理。
//! 单条失败不会影响同批次的其他条目。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{NotifierConfig, QueueConfig};
use crate::errors::Result;
use crate::services::notifier::Notifier;
use crate::services::sheets::SheetExporter;
use crate::storage::backend::setting_keys;
use crate::storage::models::{GlobalTelegramSettings, Partner, PostbackEvent, RetryDecision};
use crate::storage::traits::{PartnerRegistry, QueueStore, SettingsStore, StatsSink};

/// 处理器参数
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub batch_size: u64,
    pub max_retries: u32,
    /// processing 超过该时长视为处理器已崩溃
    pub stale_after: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for ProcessorConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries.max(1),
            stale_after: Duration::seconds(config.stale_after_secs as i64),
        }
    }
}

/// 批次统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// 已被其他处理器领取
    pub skipped: usize,
    pub reclaimed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: EntryOutcome) {
        if outcome != EntryOutcome::Skipped {
            self.claimed += 1;
        }
        match outcome {
            EntryOutcome::Completed => self.completed += 1,
            EntryOutcome::Retried => self.retried += 1,
            EntryOutcome::Failed => self.failed += 1,
            EntryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// 单条目处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Completed,
    Retried,
    Failed,
    Skipped,
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub struct QueueProcessor {
    queue: Arc<dyn QueueStore>,
    registry: Arc<dyn PartnerRegistry>,
    stats: Arc<dyn StatsSink>,
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    exporter: Arc<dyn SheetExporter>,
    /// settings 表中缺失时使用的全局 Telegram 设置
    global_defaults: GlobalTelegramSettings,
    config: ProcessorConfig,
}

impl QueueProcessor {
    pub fn new<S>(
        storage: Arc<S>,
        notifier: Arc<dyn Notifier>,
        exporter: Arc<dyn SheetExporter>,
        config: ProcessorConfig,
    ) -> Self
    where
        S: QueueStore + PartnerRegistry + StatsSink + SettingsStore + 'static,
    {
        Self {
            queue: storage.clone(),
            registry: storage.clone(),
            stats: storage.clone(),
            settings: storage,
            notifier,
            exporter,
            global_defaults: GlobalTelegramSettings::default(),
            config,
        }
    }

    /// 替换统计写入实现
    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_global_defaults(mut self, notifier: &NotifierConfig) -> Self {
        self.global_defaults = GlobalTelegramSettings {
            bot_token: notifier.bot_token.clone(),
            channel_id: notifier.channel_id.clone(),
            globally_enabled: notifier.globally_enabled,
        };
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// 加载全局 Telegram 设置快照，settings 表优先
    pub async fn load_global_settings(&self) -> GlobalTelegramSettings {
        let mut snapshot = self.global_defaults.clone();

        let read = |key: &'static str| async move {
            match self.settings.get_setting(key).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to load setting '{}': {}", key, e);
                    None
                }
            }
        };

        if let Some(token) = read(setting_keys::TELEGRAM_BOT_TOKEN).await {
            snapshot.bot_token = Some(token).filter(|t| !t.trim().is_empty());
        }
        if let Some(channel) = read(setting_keys::TELEGRAM_CHANNEL_ID).await {
            snapshot.channel_id = Some(channel).filter(|c| !c.trim().is_empty());
        }
        if let Some(flag) = read(setting_keys::TELEGRAM_GLOBALLY_ENABLED).await {
            snapshot.globally_enabled = parse_flag(&flag);
        }

        snapshot
    }

    /// 处理一个批次，至多 `limit` 条 pending 条目
    pub async fn run_batch(&self, limit: u64) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        let stale_before = Utc::now() - self.config.stale_after;
        match self
            .queue
            .reclaim_stale(stale_before, self.config.max_retries)
            .await
        {
            Ok(reclaimed) => report.reclaimed = reclaimed.len(),
            Err(e) => warn!("Stale entry reclaim failed: {}", e),
        }

        let ids = self.queue.pending_ids(limit).await?;
        if ids.is_empty() {
            debug!("No pending postbacks");
            return Ok(report);
        }

        let global = self.load_global_settings().await;

        for id in ids {
            let outcome = self.process_entry(id, &global).await;
            report.record(outcome);
        }

        info!(
            "Queue batch finished: claimed {}, completed {}, retried {}, failed {}, skipped {}, reclaimed {}",
            report.claimed,
            report.completed,
            report.retried,
            report.failed,
            report.skipped,
            report.reclaimed
        );

        Ok(report)
    }

    /// 处理单个条目
    pub async fn process_entry(&self, id: i64, global: &GlobalTelegramSettings) -> EntryOutcome {
        let entry = match self.queue.claim(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("Queue entry {} already claimed", id);
                return EntryOutcome::Skipped;
            }
            Err(e) => {
                warn!("Failed to claim queue entry {}: {}", id, e);
                return EntryOutcome::Skipped;
            }
        };

        let event = match PostbackEvent::from_json(&entry.data) {
            Ok(event) => event,
            Err(e) => {
                error!("Queue entry {} has an invalid payload: {}", id, e);
                return self.fail_permanently(id, true).await;
            }
        };

        let partner = match self.registry.get_partner(&entry.partner_id).await {
            Ok(Some(partner)) => partner,
            Ok(None) => {
                error!(
                    "Partner {} not found for queue entry {}",
                    entry.partner_id, id
                );
                // 合作方已删除，不再为其创建汇总行
                return self.fail_permanently(id, false).await;
            }
            Err(e) => return self.retry_later(id, &e.to_string()).await,
        };

        if let Err(e) = self.stats.apply_event(id, &event).await {
            return self.retry_later(id, &e.to_string()).await;
        }

        match self.queue.complete(id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Queue entry {} was reclaimed before completion", id);
                return EntryOutcome::Skipped;
            }
            Err(e) => {
                // 统计已提交，条目留在 processing 等待超时回收，不计入失败
                error!(
                    "Failed to mark queue entry {} as completed, left for stale reclaim: {}",
                    id, e
                );
                return EntryOutcome::Skipped;
            }
        }

        if partner.logging_enabled {
            info!("Processed postback {} for partner {}", id, partner.id);
        }

        self.run_side_effects(&event, &partner, global).await;
        EntryOutcome::Completed
    }

    /// 通知与导出，失败只记录日志
    async fn run_side_effects(
        &self,
        event: &PostbackEvent,
        partner: &Partner,
        global: &GlobalTelegramSettings,
    ) {
        if partner.telegram.enabled {
            match self.notifier.notify(event, partner, global).await {
                Ok(outcome) => debug!("Telegram for partner {}: {:?}", partner.id, outcome),
                Err(e) => warn!(
                    "Telegram notification failed for partner {}: {}",
                    partner.id, e
                ),
            }
        }

        if partner.sheets.target().is_some() {
            match self.exporter.export(event, partner).await {
                Ok(outcome) => debug!("Sheets export for partner {}: {:?}", partner.id, outcome),
                Err(e) => warn!(
                    "Google Sheets update failed for partner {}: {}",
                    partner.id, e
                ),
            }
        }
    }

    async fn fail_permanently(&self, id: i64, count_error: bool) -> EntryOutcome {
        match self.queue.fail_permanently(id, count_error).await {
            Ok(true) => EntryOutcome::Failed,
            Ok(false) => EntryOutcome::Skipped,
            Err(e) => {
                error!("Failed to mark queue entry {} as failed: {}", id, e);
                EntryOutcome::Retried
            }
        }
    }

    async fn retry_later(&self, id: i64, reason: &str) -> EntryOutcome {
        match self.queue.record_failure(id, self.config.max_retries).await {
            Ok(Some(RetryDecision::Requeued { retry_count })) => {
                warn!(
                    "Queue entry {} failed (attempt {}/{}), will retry: {}",
                    id, retry_count, self.config.max_retries, reason
                );
                EntryOutcome::Retried
            }
            Ok(Some(RetryDecision::Failed { retry_count })) => {
                error!(
                    "Queue entry {} failed permanently after {} attempts: {}",
                    id, retry_count, reason
                );
                EntryOutcome::Failed
            }
            Ok(None) => {
                warn!("Queue entry {} left processing before failure was recorded", id);
                EntryOutcome::Skipped
            }
            Err(e) => {
                // 条目停留在 processing，由超时回收处理
                error!(
                    "Failed to record failure for queue entry {} ({}): {}",
                    id, reason, e
                );
                EntryOutcome::Retried
            }
        }
    }

    /// 启动后台处理循环
    pub fn spawn_background_task(self: Arc<Self>, interval_secs: u64) {
        let interval = StdDuration::from_secs(interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run_batch(self.config.batch_size).await {
                    error!("Queue processing batch failed: {}", e);
                }

                tokio::time::sleep(interval).await;
            }
        });

        info!(
            "Queue processor background task started (interval: {} seconds)",
            interval_secs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_report_counts_claims() {
        let mut report = BatchReport::default();
        report.record(EntryOutcome::Completed);
        report.record(EntryOutcome::Retried);
        report.record(EntryOutcome::Skipped);
        assert_eq!(report.claimed, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_config_from_queue_config() {
        let queue = QueueConfig {
            max_retries: 0,
            stale_after_secs: 120,
            ..QueueConfig::default()
        };
        let config = ProcessorConfig::from(&queue);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.stale_after, Duration::seconds(120));
    }
}
