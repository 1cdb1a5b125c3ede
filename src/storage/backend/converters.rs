//! 数据库行 ↔ 领域模型
//!
//! 合作方的 JSON 文本列在这里解码，服务层只接触强类型的 `Partner`。

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::storage::models::{
    Partner, PostbackEvent, QueueEntry, QueueStatus, SheetSettings, SumMappingRule,
    TelegramSettings, default_clickid_keys, default_sum_keys,
};
use migration::entities::{detailed_stats, partner, postback_queue};

/// 解码可选 JSON 列，空值或格式错误时返回 None
fn decode_json_column<T: DeserializeOwned>(
    partner_id: &str,
    column: &str,
    raw: Option<&str>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                "Partner '{}' has invalid JSON in column '{}': {}",
                partner_id, column, e
            );
            None
        }
    }
}

/// 解码字符串列表，去除空白项
fn decode_string_list(partner_id: &str, column: &str, raw: Option<&str>) -> Vec<String> {
    decode_json_column::<Vec<serde_json::Value>>(partner_id, column, raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// 解码映射规则，跳过 from/to 无法解析为数字的规则
fn decode_sum_mapping(partner_id: &str, raw: Option<&str>) -> Vec<SumMappingRule> {
    decode_json_column::<Vec<serde_json::Value>>(partner_id, "sum_mapping", raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value::<SumMappingRule>(v).ok())
        .filter(|rule| is_number(&rule.from) && is_number(&rule.to))
        .collect()
}

fn is_number(raw: &str) -> bool {
    raw.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// 将数据库行转换为 Partner
pub fn model_to_partner(model: partner::Model) -> Partner {
    let id = model.id;

    let clickid_keys = decode_string_list(&id, "clickid_keys", model.clickid_keys.as_deref());
    let sum_keys = decode_string_list(&id, "sum_keys", model.sum_keys.as_deref());

    Partner {
        clickid_keys: if clickid_keys.is_empty() {
            default_clickid_keys()
        } else {
            clickid_keys
        },
        sum_keys: if sum_keys.is_empty() {
            default_sum_keys()
        } else {
            sum_keys
        },
        sum_mapping: decode_sum_mapping(&id, model.sum_mapping.as_deref()),
        ip_whitelist_enabled: model.ip_whitelist_enabled,
        allowed_ips: decode_string_list(&id, "allowed_ips", model.allowed_ips.as_deref()),
        logging_enabled: model.logging_enabled,
        telegram: TelegramSettings {
            enabled: model.telegram_enabled,
            whitelist_enabled: model.telegram_whitelist_enabled,
            whitelist_keywords: decode_string_list(
                &id,
                "telegram_whitelist_keywords",
                model.telegram_whitelist_keywords.as_deref(),
            ),
            partner_bot_enabled: model.partner_telegram_enabled,
            bot_token: non_empty(model.partner_telegram_bot_token),
            channel_id: non_empty(model.partner_telegram_channel_id),
        },
        sheets: SheetSettings {
            spreadsheet_id: non_empty(model.google_spreadsheet_id),
            sheet_name: non_empty(model.google_sheet_name),
            service_account_json: non_empty(model.google_service_account_json),
        },
        name: model.name,
        target_domain: model.target_domain,
        id,
    }
}

fn encode_list<T: serde::Serialize>(items: &[T]) -> Option<String> {
    serde_json::to_string(items).ok()
}

/// 将 Partner 转换为 ActiveModel（用于导入 upsert）
pub fn partner_to_active_model(p: &Partner, now: DateTime<Utc>) -> partner::ActiveModel {
    partner::ActiveModel {
        id: Set(p.id.clone()),
        name: Set(p.name.clone()),
        target_domain: Set(p.target_domain.clone()),
        clickid_keys: Set(encode_list(&p.clickid_keys)),
        sum_keys: Set(encode_list(&p.sum_keys)),
        sum_mapping: Set(encode_list(&p.sum_mapping)),
        ip_whitelist_enabled: Set(p.ip_whitelist_enabled),
        allowed_ips: Set(encode_list(&p.allowed_ips)),
        logging_enabled: Set(p.logging_enabled),
        telegram_enabled: Set(p.telegram.enabled),
        telegram_whitelist_enabled: Set(p.telegram.whitelist_enabled),
        telegram_whitelist_keywords: Set(encode_list(&p.telegram.whitelist_keywords)),
        partner_telegram_enabled: Set(p.telegram.partner_bot_enabled),
        partner_telegram_bot_token: Set(p.telegram.bot_token.clone()),
        partner_telegram_channel_id: Set(p.telegram.channel_id.clone()),
        google_spreadsheet_id: Set(p.sheets.spreadsheet_id.clone()),
        google_sheet_name: Set(p.sheets.sheet_name.clone()),
        google_service_account_json: Set(p.sheets.service_account_json.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// 将队列行转换为 QueueEntry，未知状态返回 None
pub fn model_to_queue_entry(model: postback_queue::Model) -> Option<QueueEntry> {
    let status = match model.status.parse::<QueueStatus>() {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Queue entry {} has unknown status '{}'",
                model.id, model.status
            );
            return None;
        }
    };

    Some(QueueEntry {
        id: model.id,
        partner_id: model.partner_id,
        data: model.data,
        status,
        retry_count: model.retry_count.max(0) as u32,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// 明细统计行，`is_new` 为 false 时保留 created_at
pub fn event_to_detailed_model(
    queue_id: i64,
    event: &PostbackEvent,
    extra_params_json: String,
    now: DateTime<Utc>,
    is_new: bool,
) -> detailed_stats::ActiveModel {
    detailed_stats::ActiveModel {
        id: NotSet,
        event_key: Set(event.event_key()),
        partner_id: Set(event.partner_id.clone()),
        timestamp: Set(event.timestamp),
        click_id: Set(event.click_id.clone()),
        url: Set(event.url.clone()),
        client_ip: Set(event.client_ip.clone()),
        user_agent: Set(event.user_agent.clone()),
        method: Set(event.method.clone()),
        sum: Set(event.sum),
        sum_mapping: Set(event.sum_mapping),
        extra_params: Set(extra_params_json),
        queue_id: Set(queue_id),
        created_at: if is_new { Set(now) } else { NotSet },
        updated_at: Set(now),
    }
}
