use async_trait::async_trait;
use chrono::Utc;
use sea_orm::EntityTrait;
use sea_orm::sea_query::OnConflict;
use tracing::info;

use super::SeaOrmStorage;
use super::converters::{model_to_partner, partner_to_active_model};
use super::retry;
use crate::errors::{Result, TrackerError};
use crate::storage::models::Partner;
use crate::storage::traits::PartnerRegistry;
use migration::entities::partner;

#[async_trait]
impl PartnerRegistry for SeaOrmStorage {
    async fn get_partner(&self, id: &str) -> Result<Option<Partner>> {
        let db = &self.db;
        let model = retry::with_retry("get_partner", self.retry_config, || async {
            partner::Entity::find_by_id(id.to_string()).one(db).await
        })
        .await
        .map_err(|e| {
            TrackerError::database_operation(format!("查询合作方 '{}' 失败: {}", id, e))
        })?;

        Ok(model.map(model_to_partner))
    }
}

impl SeaOrmStorage {
    /// 插入或覆盖合作方配置（created_at 保持首次写入值）
    pub async fn upsert_partner(&self, p: &Partner) -> Result<()> {
        if p.id.trim().is_empty() {
            return Err(TrackerError::validation("Partner id must not be empty"));
        }

        let active = partner_to_active_model(p, Utc::now());
        let db = &self.db;
        retry::with_retry("upsert_partner", self.retry_config, || async {
            partner::Entity::insert(active.clone())
                .on_conflict(
                    OnConflict::column(partner::Column::Id)
                        .update_columns([
                            partner::Column::Name,
                            partner::Column::TargetDomain,
                            partner::Column::ClickidKeys,
                            partner::Column::SumKeys,
                            partner::Column::SumMapping,
                            partner::Column::IpWhitelistEnabled,
                            partner::Column::AllowedIps,
                            partner::Column::LoggingEnabled,
                            partner::Column::TelegramEnabled,
                            partner::Column::TelegramWhitelistEnabled,
                            partner::Column::TelegramWhitelistKeywords,
                            partner::Column::PartnerTelegramEnabled,
                            partner::Column::PartnerTelegramBotToken,
                            partner::Column::PartnerTelegramChannelId,
                            partner::Column::GoogleSpreadsheetId,
                            partner::Column::GoogleSheetName,
                            partner::Column::GoogleServiceAccountJson,
                            partner::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(db)
                .await
        })
        .await
        .map_err(|e| {
            TrackerError::database_operation(format!("写入合作方 '{}' 失败: {}", p.id, e))
        })?;

        info!("Partner upserted: {}", p.id);
        Ok(())
    }

    /// 删除合作方
    pub async fn delete_partner(&self, id: &str) -> Result<bool> {
        let result = partner::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
