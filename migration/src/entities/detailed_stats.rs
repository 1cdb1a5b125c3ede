//! 明细统计实体，每个逻辑事件一行（按 event_key 幂等 upsert）

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "detailed_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub event_key: String,
    pub partner_id: String,
    pub timestamp: DateTimeUtc,
    pub click_id: Option<String>,
    #[sea_orm(column_type = "Text")]
    pub url: String,
    pub client_ip: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub user_agent: Option<String>,
    pub method: String,
    #[sea_orm(column_type = "Double", nullable)]
    pub sum: Option<f64>,
    #[sea_orm(column_type = "Double")]
    pub sum_mapping: f64,
    /// JSON 对象
    #[sea_orm(column_type = "Text")]
    pub extra_params: String,
    /// 最近一次写入该行的队列条目
    pub queue_id: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
