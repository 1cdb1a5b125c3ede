//! Telegram 通知
//!
//! 尽力而为：失败只记录日志，不会影响队列条目状态。

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};
use ureq::Agent;

use crate::config::NotifierConfig;
use crate::errors::TrackerError;
use crate::services::http::{build_agent, describe_error, run_blocking};
use crate::storage::models::{GlobalTelegramSettings, Partner, PostbackEvent};
use crate::utils::format_timestamp;

/// 一次通知的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// 没有可用凭据
    NotConfigured,
    /// 未命中白名单关键字
    FilteredOut,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event: &PostbackEvent,
        partner: &Partner,
        global: &GlobalTelegramSettings,
    ) -> anyhow::Result<NotifyOutcome>;
}

/// 选择生效的 bot token 与 channel
///
/// 合作方开启独立 bot 且两项都已填写时使用合作方凭据，
/// 否则在全局开启时使用全局凭据。
pub fn resolve_credentials(
    partner: &Partner,
    global: &GlobalTelegramSettings,
) -> Option<(String, String)> {
    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    let tg = &partner.telegram;
    if tg.partner_bot_enabled
        && let (Some(token), Some(channel)) = (non_empty(&tg.bot_token), non_empty(&tg.channel_id))
    {
        return Some((token.to_string(), channel.to_string()));
    }

    if !global.globally_enabled {
        return None;
    }

    match (non_empty(&global.bot_token), non_empty(&global.channel_id)) {
        (Some(token), Some(channel)) => Some((token.to_string(), channel.to_string())),
        _ => None,
    }
}

/// 白名单过滤：序列化后的事件包含任一关键字（忽略大小写）即通过
pub fn passes_whitelist(serialized_event: &str, keywords: &[String]) -> bool {
    let haystack = serialized_event.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k.to_lowercase()))
}

pub fn format_message(event: &PostbackEvent) -> String {
    let mut message = String::from("🔔 *New Postback Processed*\n\n");
    message.push_str(&format!("Partner: `{}`\n", event.partner_id));
    message.push_str(&format!("Time: `{}`\n", format_timestamp(&event.timestamp)));

    if let Some(click_id) = event.click_id.as_deref().filter(|c| !c.is_empty()) {
        message.push_str(&format!("Click ID: `{}`\n", click_id));
    }
    if let Some(sum) = event.sum.filter(|s| *s != 0.0) {
        message.push_str(&format!("Conversion Value: `{}`\n", sum));
    }
    if event.sum_mapping != 0.0 {
        message.push_str(&format!("Mapped Value: `{}`\n", event.sum_mapping));
    }
    if let Some(ip) = event.client_ip.as_deref() {
        message.push_str(&format!("IP: `{}`\n", ip));
    }

    message
}

pub struct TelegramNotifier {
    agent: Agent,
    api_base: String,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            agent: build_agent(timeout),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn send_sync(agent: Agent, url: String, channel_id: String, text: String) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": channel_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let resp = agent.post(&url).send_json(&body).map_err(|e| {
            TrackerError::notification(describe_error("Telegram notification", e))
        })?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(TrackerError::notification(format!(
                "Telegram notification failed. HTTP Code: {}",
                status
            ))
            .into());
        }

        trace!("Telegram API accepted message for channel {}", channel_id);
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        event: &PostbackEvent,
        partner: &Partner,
        global: &GlobalTelegramSettings,
    ) -> anyhow::Result<NotifyOutcome> {
        let Some((token, channel_id)) = resolve_credentials(partner, global) else {
            debug!("Telegram not configured for partner {}", partner.id);
            return Ok(NotifyOutcome::NotConfigured);
        };

        let tg = &partner.telegram;
        if tg.whitelist_enabled && !tg.whitelist_keywords.is_empty() {
            let serialized = event.to_json()?;
            if !passes_whitelist(&serialized, &tg.whitelist_keywords) {
                debug!("Postback for partner {} filtered by whitelist", partner.id);
                return Ok(NotifyOutcome::FilteredOut);
            }
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let text = format_message(event);
        let agent = self.agent.clone();

        run_blocking("Telegram notification", self.timeout, move || {
            Self::send_sync(agent, url, channel_id, text)
        })
        .await?;

        Ok(NotifyOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn event() -> PostbackEvent {
        PostbackEvent {
            partner_id: "acme".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            click_id: Some("xyz".to_string()),
            url: "http://localhost/postback?pid=acme&clickid=xyz".to_string(),
            client_ip: Some("10.0.0.1".to_string()),
            user_agent: None,
            method: "GET".to_string(),
            sum: Some(5.0),
            sum_mapping: 0.0,
            extra_params: BTreeMap::new(),
        }
    }

    fn global(enabled: bool) -> GlobalTelegramSettings {
        GlobalTelegramSettings {
            bot_token: Some("global-token".to_string()),
            channel_id: Some("@global".to_string()),
            globally_enabled: enabled,
        }
    }

    #[test]
    fn test_partner_credentials_take_precedence() {
        let mut partner = Partner::new("acme", "Acme");
        partner.telegram.partner_bot_enabled = true;
        partner.telegram.bot_token = Some("own-token".to_string());
        partner.telegram.channel_id = Some("@own".to_string());

        assert_eq!(
            resolve_credentials(&partner, &global(true)),
            Some(("own-token".to_string(), "@own".to_string()))
        );
    }

    #[test]
    fn test_incomplete_partner_credentials_fall_back_to_global() {
        let mut partner = Partner::new("acme", "Acme");
        partner.telegram.partner_bot_enabled = true;
        partner.telegram.bot_token = Some("own-token".to_string());

        assert_eq!(
            resolve_credentials(&partner, &global(true)),
            Some(("global-token".to_string(), "@global".to_string()))
        );
        assert_eq!(resolve_credentials(&partner, &global(false)), None);
    }

    #[test]
    fn test_global_requires_both_values() {
        let partner = Partner::new("acme", "Acme");
        let mut settings = global(true);
        settings.channel_id = Some("  ".to_string());
        assert_eq!(resolve_credentials(&partner, &settings), None);
    }

    #[test]
    fn test_whitelist_is_case_insensitive() {
        let json = event().to_json().unwrap();
        assert!(passes_whitelist(&json, &["XYZ".to_string()]));
        assert!(!passes_whitelist(&json, &["nomatch".to_string()]));
        assert!(!passes_whitelist(&json, &[String::new()]));
    }

    #[test]
    fn test_message_format() {
        let message = format_message(&event());
        assert!(message.starts_with("🔔 *New Postback Processed*\n\n"));
        assert!(message.contains("Partner: `acme`\n"));
        assert!(message.contains("Time: `2025-03-01 12:00:00`\n"));
        assert!(message.contains("Click ID: `xyz`\n"));
        assert!(message.contains("Conversion Value: `5`\n"));
        assert!(!message.contains("Mapped Value"));
        assert!(message.contains("IP: `10.0.0.1`\n"));
    }

    #[test]
    fn test_message_omits_empty_fields() {
        let mut e = event();
        e.click_id = Some(String::new());
        e.sum = None;
        e.sum_mapping = 20.0;
        e.client_ip = None;
        let message = format_message(&e);
        assert!(!message.contains("Click ID"));
        assert!(!message.contains("Conversion Value"));
        assert!(message.contains("Mapped Value: `20`\n"));
        assert!(!message.contains("IP:"));
    }

    #[tokio::test]
    async fn test_notify_without_credentials_is_skipped() {
        let notifier = TelegramNotifier::new(&NotifierConfig::default());
        let partner = Partner::new("acme", "Acme");
        let outcome = notifier
            .notify(&event(), &partner, &GlobalTelegramSettings::default())
            .await
            .unwrap();
        assert_eq!(outcome, NotifyOutcome::NotConfigured);
    }
}
