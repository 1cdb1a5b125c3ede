use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};
use xxhash_rust::xxh64::xxh64;

use crate::utils::time::{format_timestamp, second_precision};

/// 未配置时的候选 click id 参数名
pub const DEFAULT_CLICKID_KEYS: [&str; 2] = ["clickid", "cid"];
/// 未配置时的候选金额参数名
pub const DEFAULT_SUM_KEYS: [&str; 2] = ["sum", "payout"];

/// 金额映射规则，`from` 与 `to` 保留原始文本，使用时再解析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumMappingRule {
    #[serde(deserialize_with = "string_or_number")]
    pub from: String,
    #[serde(deserialize_with = "string_or_number")]
    pub to: String,
}

impl SumMappingRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// 合作方 Telegram 设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub enabled: bool,
    pub whitelist_enabled: bool,
    pub whitelist_keywords: Vec<String>,
    /// 使用合作方自己的 bot 凭据
    pub partner_bot_enabled: bool,
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
}

/// 合作方 Google Sheets 导出目标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetSettings {
    pub spreadsheet_id: Option<String>,
    pub sheet_name: Option<String>,
    pub service_account_json: Option<String>,
}

impl SheetSettings {
    /// spreadsheet id 与 sheet name 均非空时返回导出目标
    pub fn target(&self) -> Option<(&str, &str)> {
        let id = self.spreadsheet_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let name = self.sheet_name.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((id, name))
    }
}

/// 强类型的合作方配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub target_domain: Option<String>,
    #[serde(default = "default_clickid_keys")]
    pub clickid_keys: Vec<String>,
    #[serde(default = "default_sum_keys")]
    pub sum_keys: Vec<String>,
    #[serde(default)]
    pub sum_mapping: Vec<SumMappingRule>,
    #[serde(default)]
    pub ip_whitelist_enabled: bool,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub logging_enabled: bool,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub sheets: SheetSettings,
}

pub fn default_clickid_keys() -> Vec<String> {
    DEFAULT_CLICKID_KEYS.iter().map(|k| k.to_string()).collect()
}

pub fn default_sum_keys() -> Vec<String> {
    DEFAULT_SUM_KEYS.iter().map(|k| k.to_string()).collect()
}

impl Partner {
    /// 仅含 id/name，其余为默认值
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target_domain: None,
            clickid_keys: default_clickid_keys(),
            sum_keys: default_sum_keys(),
            sum_mapping: Vec::new(),
            ip_whitelist_enabled: false,
            allowed_ips: Vec::new(),
            logging_enabled: false,
            telegram: TelegramSettings::default(),
            sheets: SheetSettings::default(),
        }
    }

    /// 白名单开启且非空时，IP 必须精确匹配
    pub fn is_ip_allowed(&self, ip: Option<&str>) -> bool {
        if !self.ip_whitelist_enabled || self.allowed_ips.is_empty() {
            return true;
        }
        ip.is_some_and(|ip| self.allowed_ips.iter().any(|allowed| allowed == ip))
    }
}

/// 队列条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub partner_id: String,
    pub data: String,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 入站参数值：单值或 `key[]` 形式的数组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            ParamValue::Single(s) => Some(s.as_str()),
            ParamValue::Multi(values) => values.first().map(String::as_str),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            ParamValue::Single(s) => Some(s.as_str()),
            ParamValue::Multi(_) => None,
        }
    }
}

/// 队列负载：一次 postback 的完整快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostbackEvent {
    pub partner_id: String,
    #[serde(with = "second_precision")]
    pub timestamp: DateTime<Utc>,
    pub click_id: Option<String>,
    pub url: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub sum: Option<f64>,
    pub sum_mapping: f64,
    #[serde(default)]
    pub extra_params: BTreeMap<String, ParamValue>,
}

impl PostbackEvent {
    /// 明细统计的幂等键：partner_id、timestamp、click_id 的 XXH64
    pub fn event_key(&self) -> String {
        let material = format!(
            "{}\u{1f}{}\u{1f}{}",
            self.partner_id,
            format_timestamp(&self.timestamp),
            self.click_id.as_deref().unwrap_or("")
        );
        format!("{:016x}", xxh64(material.as_bytes(), 0))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// 明细统计写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsOutcome {
    Inserted,
    Updated,
}

/// 一次失败尝试后的队列状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeued { retry_count: u32 },
    Failed { retry_count: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub completed_deleted: u64,
    pub failed_deleted: u64,
}

/// 全局 Telegram 设置快照，每个批次加载一次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalTelegramSettings {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
    pub globally_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> PostbackEvent {
        PostbackEvent {
            partner_id: "acme".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            click_id: Some("xyz".to_string()),
            url: "http://localhost/postback?pid=acme".to_string(),
            client_ip: Some("1.2.3.4".to_string()),
            user_agent: None,
            method: "GET".to_string(),
            sum: Some(5.0),
            sum_mapping: 0.0,
            extra_params: BTreeMap::new(),
        }
    }

    #[test]
    fn test_event_key_is_stable_and_distinct() {
        let event = sample_event();
        let key = event.event_key();
        assert_eq!(key.len(), 16);
        assert_eq!(key, sample_event().event_key());

        let mut other = sample_event();
        other.click_id = Some("abc".to_string());
        assert_ne!(key, other.event_key());

        // 金额变化不影响幂等键
        let mut resent = sample_event();
        resent.sum = Some(7.5);
        assert_eq!(key, resent.event_key());
    }

    #[test]
    fn test_payload_json_shape() {
        let json = sample_event().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timestamp"], "2025-01-02 03:04:05");
        assert_eq!(value["sum"], 5.0);
        assert!(value["user_agent"].is_null());
        assert_eq!(PostbackEvent::from_json(&json).unwrap(), sample_event());
    }

    #[test]
    fn test_sum_mapping_rule_accepts_numbers_and_strings() {
        let rules: Vec<SumMappingRule> =
            serde_json::from_str(r#"[{"from": 1, "to": "10"}, {"from": "2.5", "to": 20.5}]"#)
                .unwrap();
        assert_eq!(rules[0], SumMappingRule::new("1", "10"));
        assert_eq!(rules[1], SumMappingRule::new("2.5", "20.5"));
    }

    #[test]
    fn test_ip_allowed() {
        let mut partner = Partner::new("acme", "Acme");
        assert!(partner.is_ip_allowed(None));

        partner.ip_whitelist_enabled = true;
        assert!(partner.is_ip_allowed(Some("9.9.9.9")));

        partner.allowed_ips = vec!["1.2.3.4".to_string()];
        assert!(partner.is_ip_allowed(Some("1.2.3.4")));
        assert!(!partner.is_ip_allowed(Some("1.2.3.40")));
        assert!(!partner.is_ip_allowed(None));
    }

    #[test]
    fn test_queue_status_strings() {
        assert_eq!(QueueStatus::Pending.as_ref(), "pending");
        assert_eq!("failed".parse::<QueueStatus>().unwrap(), QueueStatus::Failed);
        assert!("done".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_sheet_target_requires_both_fields() {
        let mut sheets = SheetSettings::default();
        assert!(sheets.target().is_none());
        sheets.spreadsheet_id = Some("sheet-id".to_string());
        assert!(sheets.target().is_none());
        sheets.sheet_name = Some("Postbacks".to_string());
        assert_eq!(sheets.target(), Some(("sheet-id", "Postbacks")));
    }
}
