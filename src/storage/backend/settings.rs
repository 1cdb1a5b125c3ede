use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, EntityTrait};

use super::SeaOrmStorage;
use super::retry;
use crate::errors::{Result, TrackerError};
use crate::storage::traits::SettingsStore;
use migration::entities::setting;

/// settings 表中的键
pub mod keys {
    pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";
    pub const TELEGRAM_CHANNEL_ID: &str = "telegram_channel_id";
    pub const TELEGRAM_GLOBALLY_ENABLED: &str = "telegram_globally_enabled";
}

#[async_trait]
impl SettingsStore for SeaOrmStorage {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = &self.db;
        let model = retry::with_retry("get_setting", self.retry_config, || async {
            setting::Entity::find_by_id(key.to_string()).one(db).await
        })
        .await
        .map_err(|e| TrackerError::database_operation(format!("读取设置 '{}' 失败: {}", key, e)))?;

        Ok(model.and_then(|m| m.setting_value))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        setting::Entity::insert(setting::ActiveModel {
            setting_key: Set(key.to_string()),
            setting_value: Set(Some(value.to_string())),
            updated_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::column(setting::Column::SettingKey)
                .update_columns([setting::Column::SettingValue, setting::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(&self.db)
        .await
        .map_err(|e| TrackerError::database_operation(format!("写入设置 '{}' 失败: {}", key, e)))?;
        Ok(())
    }
}
