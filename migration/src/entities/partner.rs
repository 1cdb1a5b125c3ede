//! 合作方（流量来源）配置实体
//!
//! JSON 列以文本形式存储，由 storage 层解码为强类型的 `Partner`。

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "partners")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(nullable)]
    pub target_domain: Option<String>,
    /// JSON 数组，候选 click id 参数名
    #[sea_orm(column_type = "Text", nullable)]
    pub clickid_keys: Option<String>,
    /// JSON 数组，候选金额参数名
    #[sea_orm(column_type = "Text", nullable)]
    pub sum_keys: Option<String>,
    /// JSON 数组，[{"from": .., "to": ..}]
    #[sea_orm(column_type = "Text", nullable)]
    pub sum_mapping: Option<String>,
    pub ip_whitelist_enabled: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub allowed_ips: Option<String>,
    pub logging_enabled: bool,
    pub telegram_enabled: bool,
    pub telegram_whitelist_enabled: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub telegram_whitelist_keywords: Option<String>,
    pub partner_telegram_enabled: bool,
    pub partner_telegram_bot_token: Option<String>,
    pub partner_telegram_channel_id: Option<String>,
    pub google_spreadsheet_id: Option<String>,
    pub google_sheet_name: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub google_service_account_json: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
