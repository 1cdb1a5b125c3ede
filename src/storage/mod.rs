use std::sync::Arc;

use crate::errors::Result;

pub mod backend;
pub mod models;
pub mod traits;

pub use backend::SeaOrmStorage;
pub use models::{
    ParamValue, Partner, PostbackEvent, QueueCounts, QueueEntry, QueueStatus, RetryDecision,
    StatsOutcome,
};
pub use traits::{PartnerRegistry, QueueStore, SettingsStore, StatsSink};

pub struct StorageFactory;

impl StorageFactory {
    /// 按全局配置创建存储并运行迁移
    pub async fn create() -> Result<Arc<SeaOrmStorage>> {
        let config = crate::config::get_config();
        let storage = SeaOrmStorage::new(&config.database).await?;
        Ok(Arc::new(storage))
    }
}
