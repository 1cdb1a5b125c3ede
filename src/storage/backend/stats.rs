//! StatsSink implementation for SeaOrmStorage
//!
//! 明细 upsert 与汇总累加在同一事务内完成；只有首次出现的 event_key
//! 才会累加 total_requests / successful_redirects。

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, ExprTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::debug;

use super::SeaOrmStorage;
use super::converters::event_to_detailed_model;
use super::retry;
use crate::errors::{Result, TrackerError};
use crate::storage::models::{PostbackEvent, StatsOutcome};
use crate::storage::traits::StatsSink;
use migration::entities::{detailed_stats, summary_stats};

impl SeaOrmStorage {
    async fn apply_event_once(
        &self,
        queue_id: i64,
        event: &PostbackEvent,
        extra_params_json: &str,
    ) -> std::result::Result<StatsOutcome, DbErr> {
        let now = Utc::now();
        let event_key = event.event_key();
        let txn = self.db.begin().await?;

        let existing = detailed_stats::Entity::find()
            .filter(detailed_stats::Column::EventKey.eq(event_key.as_str()))
            .one(&txn)
            .await?;

        let outcome = match existing {
            Some(row) => {
                let mut active =
                    event_to_detailed_model(queue_id, event, extra_params_json.to_string(), now, false);
                active.id = Set(row.id);
                detailed_stats::Entity::update(active).exec(&txn).await?;
                StatsOutcome::Updated
            }
            None => {
                let active =
                    event_to_detailed_model(queue_id, event, extra_params_json.to_string(), now, true);
                detailed_stats::Entity::insert(active)
                    .exec_without_returning(&txn)
                    .await?;

                summary_stats::Entity::insert(summary_stats::ActiveModel {
                    partner_id: Set(event.partner_id.clone()),
                    total_requests: Set(1),
                    successful_redirects: Set(1),
                    errors: Set(0),
                    updated_at: Set(now),
                })
                .on_conflict(
                    OnConflict::column(summary_stats::Column::PartnerId)
                        .value(
                            summary_stats::Column::TotalRequests,
                            Expr::col(summary_stats::Column::TotalRequests).add(1),
                        )
                        .value(
                            summary_stats::Column::SuccessfulRedirects,
                            Expr::col(summary_stats::Column::SuccessfulRedirects).add(1),
                        )
                        .value(summary_stats::Column::UpdatedAt, Expr::value(now))
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;

                StatsOutcome::Inserted
            }
        };

        txn.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl StatsSink for SeaOrmStorage {
    async fn apply_event(&self, queue_id: i64, event: &PostbackEvent) -> Result<StatsOutcome> {
        let extra_params_json = serde_json::to_string(&event.extra_params)?;

        let mut result = retry::with_retry("apply_event", self.retry_config, || {
            self.apply_event_once(queue_id, event, &extra_params_json)
        })
        .await;

        // 并发插入同一 event_key：重读后按已存在处理
        if let Err(e) = &result
            && retry::is_unique_violation(e)
        {
            debug!(
                "Concurrent insert for event {} detected, retrying as update",
                event.event_key()
            );
            result = self
                .apply_event_once(queue_id, event, &extra_params_json)
                .await;
        }

        let outcome = result.map_err(|e| {
            TrackerError::database_operation(format!(
                "写入统计失败 (partner: {}, queue: {}): {}",
                event.partner_id, queue_id, e
            ))
        })?;

        debug!(
            "Stats {:?} for partner {} (queue {})",
            outcome, event.partner_id, queue_id
        );
        Ok(outcome)
    }
}

impl SeaOrmStorage {
    /// 合作方的汇总计数
    pub async fn summary_for(&self, partner_id: &str) -> Result<Option<summary_stats::Model>> {
        Ok(summary_stats::Entity::find_by_id(partner_id.to_string())
            .one(&self.db)
            .await?)
    }

    /// 合作方的明细记录，按时间升序
    pub async fn detailed_for(&self, partner_id: &str) -> Result<Vec<detailed_stats::Model>> {
        Ok(detailed_stats::Entity::find()
            .filter(detailed_stats::Column::PartnerId.eq(partner_id))
            .order_by_asc(detailed_stats::Column::Timestamp)
            .order_by_asc(detailed_stats::Column::Id)
            .all(&self.db)
            .await?)
    }
}
