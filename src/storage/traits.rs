//! 存储层接口
//!
//! 服务层只依赖这些 trait，`SeaOrmStorage` 统一实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

use super::models::{
    Partner, PostbackEvent, PurgeReport, QueueCounts, QueueEntry, RetryDecision, StatsOutcome,
};

/// 合作方配置只读查询
#[async_trait]
pub trait PartnerRegistry: Send + Sync {
    async fn get_partner(&self, id: &str) -> Result<Option<Partner>>;
}

/// 持久化的 postback 队列
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 追加一条 pending 记录，返回队列 id
    async fn enqueue(&self, partner_id: &str, payload: &str) -> Result<i64>;

    /// 按 created_at 升序返回至多 `limit` 个 pending 条目 id
    async fn pending_ids(&self, limit: u64) -> Result<Vec<i64>>;

    /// 条件更新 pending → processing，仅当条目仍为 pending 时成功
    async fn claim(&self, id: i64) -> Result<Option<QueueEntry>>;

    /// processing → completed
    async fn complete(&self, id: i64) -> Result<bool>;

    /// processing → failed，不计入重试
    ///
    /// `count_error` 为 true 时在同一事务内累加合作方的 errors 计数
    async fn fail_permanently(&self, id: i64, count_error: bool) -> Result<bool>;

    /// 记录一次失败尝试：retry_count + 1，达到上限则 failed，否则回到 pending
    async fn record_failure(&self, id: i64, max_retries: u32) -> Result<Option<RetryDecision>>;

    /// 将 updated_at 早于 `stale_before` 的 processing 条目按一次失败处理
    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<(i64, RetryDecision)>>;

    /// 删除过期的 completed / failed 条目
    async fn purge_finished(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<PurgeReport>;

    async fn get_entry(&self, id: i64) -> Result<Option<QueueEntry>>;

    async fn counts(&self) -> Result<QueueCounts>;
}

/// 统计写入
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// 在单个事务内按 event_key upsert 明细并（仅新事件）累加汇总计数
    async fn apply_event(&self, queue_id: i64, event: &PostbackEvent) -> Result<StatsOutcome>;
}

/// 全局键值设置
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
