//! QueueStore implementation for SeaOrmStorage
//!
//! 所有状态流转都是带 `status = 当前状态` 条件的 UPDATE，
//! 受影响行数为 0 表示条目已被其他处理器接管。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    ExprTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::{debug, warn};

use super::SeaOrmStorage;
use super::converters::model_to_queue_entry;
use super::retry;
use crate::errors::{Result, TrackerError};
use crate::storage::models::{PurgeReport, QueueCounts, QueueEntry, QueueStatus, RetryDecision};
use crate::storage::traits::QueueStore;
use migration::entities::{postback_queue, summary_stats};

/// 条件状态流转，返回是否命中
async fn transition<C: ConnectionTrait>(
    db: &C,
    id: i64,
    from: QueueStatus,
    to: QueueStatus,
    retry_count: Option<u32>,
) -> std::result::Result<bool, DbErr> {
    let mut update = postback_queue::Entity::update_many()
        .col_expr(postback_queue::Column::Status, Expr::value(to.as_ref()))
        .col_expr(postback_queue::Column::UpdatedAt, Expr::value(Utc::now()));

    if let Some(count) = retry_count {
        update = update.col_expr(postback_queue::Column::RetryCount, Expr::value(count as i32));
    }

    let result = update
        .filter(postback_queue::Column::Id.eq(id))
        .filter(postback_queue::Column::Status.eq(from.as_ref()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// 合作方汇总 errors + 1（不存在则创建）
async fn increment_errors<C: ConnectionTrait>(
    db: &C,
    partner_id: &str,
) -> std::result::Result<(), DbErr> {
    let now = Utc::now();
    summary_stats::Entity::insert(summary_stats::ActiveModel {
        partner_id: Set(partner_id.to_string()),
        total_requests: Set(0),
        successful_redirects: Set(0),
        errors: Set(1),
        updated_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(summary_stats::Column::PartnerId)
            .value(
                summary_stats::Column::Errors,
                Expr::col(summary_stats::Column::Errors).add(1),
            )
            .value(summary_stats::Column::UpdatedAt, Expr::value(now))
            .to_owned(),
    )
    .exec_without_returning(db)
    .await?;
    Ok(())
}

impl SeaOrmStorage {
    /// 单次事务：记录一次失败尝试
    async fn record_failure_once(
        &self,
        id: i64,
        max_retries: u32,
    ) -> std::result::Result<Option<RetryDecision>, DbErr> {
        let txn = self.db.begin().await?;

        let Some(model) = postback_queue::Entity::find_by_id(id)
            .filter(postback_queue::Column::Status.eq(QueueStatus::Processing.as_ref()))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(None);
        };

        let retry_count = Ord::max(model.retry_count, 0) as u32 + 1;
        let decision = if retry_count >= max_retries {
            RetryDecision::Failed { retry_count }
        } else {
            RetryDecision::Requeued { retry_count }
        };

        let target = match decision {
            RetryDecision::Failed { .. } => QueueStatus::Failed,
            RetryDecision::Requeued { .. } => QueueStatus::Pending,
        };

        if !transition(&txn, id, QueueStatus::Processing, target, Some(retry_count)).await? {
            txn.rollback().await?;
            return Ok(None);
        }

        if matches!(decision, RetryDecision::Failed { .. }) {
            increment_errors(&txn, &model.partner_id).await?;
        }

        txn.commit().await?;
        Ok(Some(decision))
    }

    /// 单次事务：直接进入 failed，可选累加 errors
    async fn fail_permanently_once(
        &self,
        id: i64,
        count_error: bool,
    ) -> std::result::Result<bool, DbErr> {
        let txn = self.db.begin().await?;

        let Some(model) = postback_queue::Entity::find_by_id(id)
            .filter(postback_queue::Column::Status.eq(QueueStatus::Processing.as_ref()))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        if !transition(&txn, id, QueueStatus::Processing, QueueStatus::Failed, None).await? {
            txn.rollback().await?;
            return Ok(false);
        }

        if count_error {
            increment_errors(&txn, &model.partner_id).await?;
        }

        txn.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl QueueStore for SeaOrmStorage {
    async fn enqueue(&self, partner_id: &str, payload: &str) -> Result<i64> {
        let now = Utc::now();
        let active = postback_queue::ActiveModel {
            partner_id: Set(partner_id.to_string()),
            data: Set(payload.to_string()),
            status: Set(QueueStatus::Pending.to_string()),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.db)
            .await
            .map_err(|e| TrackerError::database_operation(format!("写入队列失败: {}", e)))?;

        debug!("Queued postback {} for partner {}", model.id, partner_id);
        Ok(model.id)
    }

    async fn pending_ids(&self, limit: u64) -> Result<Vec<i64>> {
        let db = &self.db;
        retry::with_retry("pending_ids", self.retry_config, || async {
            postback_queue::Entity::find()
                .select_only()
                .column(postback_queue::Column::Id)
                .filter(postback_queue::Column::Status.eq(QueueStatus::Pending.as_ref()))
                .order_by_asc(postback_queue::Column::CreatedAt)
                .order_by_asc(postback_queue::Column::Id)
                .limit(limit)
                .into_tuple::<i64>()
                .all(db)
                .await
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("查询待处理队列失败: {}", e)))
    }

    async fn claim(&self, id: i64) -> Result<Option<QueueEntry>> {
        let db = &self.db;
        let claimed = retry::with_retry("claim", self.retry_config, || async {
            transition(db, id, QueueStatus::Pending, QueueStatus::Processing, None).await
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("领取队列条目 {} 失败: {}", id, e)))?;

        if !claimed {
            return Ok(None);
        }

        self.get_entry(id).await
    }

    async fn complete(&self, id: i64) -> Result<bool> {
        let db = &self.db;
        retry::with_retry("complete", self.retry_config, || async {
            transition(db, id, QueueStatus::Processing, QueueStatus::Completed, None).await
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("标记完成失败 {}: {}", id, e)))
    }

    async fn fail_permanently(&self, id: i64, count_error: bool) -> Result<bool> {
        retry::with_retry("fail_permanently", self.retry_config, || {
            self.fail_permanently_once(id, count_error)
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("标记失败出错 {}: {}", id, e)))
    }

    async fn record_failure(&self, id: i64, max_retries: u32) -> Result<Option<RetryDecision>> {
        retry::with_retry("record_failure", self.retry_config, || {
            self.record_failure_once(id, max_retries)
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("记录失败重试出错 {}: {}", id, e)))
    }

    async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<(i64, RetryDecision)>> {
        let stale_ids: Vec<i64> = postback_queue::Entity::find()
            .select_only()
            .column(postback_queue::Column::Id)
            .filter(postback_queue::Column::Status.eq(QueueStatus::Processing.as_ref()))
            .filter(postback_queue::Column::UpdatedAt.lt(stale_before))
            .order_by_asc(postback_queue::Column::Id)
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut reclaimed = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            match self.record_failure(id, max_retries).await {
                Ok(Some(decision)) => {
                    warn!("Reclaimed stale queue entry {}: {:?}", id, decision);
                    reclaimed.push((id, decision));
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to reclaim stale queue entry {}: {}", id, e),
            }
        }

        Ok(reclaimed)
    }

    async fn purge_finished(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<PurgeReport> {
        let completed_deleted = postback_queue::Entity::delete_many()
            .filter(postback_queue::Column::Status.eq(QueueStatus::Completed.as_ref()))
            .filter(postback_queue::Column::UpdatedAt.lt(completed_before))
            .exec(&self.db)
            .await?
            .rows_affected;

        let failed_deleted = postback_queue::Entity::delete_many()
            .filter(postback_queue::Column::Status.eq(QueueStatus::Failed.as_ref()))
            .filter(postback_queue::Column::UpdatedAt.lt(failed_before))
            .exec(&self.db)
            .await?
            .rows_affected;

        Ok(PurgeReport {
            completed_deleted,
            failed_deleted,
        })
    }

    async fn get_entry(&self, id: i64) -> Result<Option<QueueEntry>> {
        let model = postback_queue::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.and_then(model_to_queue_entry))
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let count_status = |status: QueueStatus| async move {
            postback_queue::Entity::find()
                .filter(postback_queue::Column::Status.eq(status.as_ref()))
                .count(&self.db)
                .await
        };

        Ok(QueueCounts {
            pending: count_status(QueueStatus::Pending).await?,
            processing: count_status(QueueStatus::Processing).await?,
            completed: count_status(QueueStatus::Completed).await?,
            failed: count_status(QueueStatus::Failed).await?,
        })
    }
}
