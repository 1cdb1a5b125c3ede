//! Google Sheets 导出
//!
//! 使用合作方的 service account 凭据换取 access token，
//! 每条处理完成的 postback 追加一行。尽力而为，失败只记录日志。

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use ureq::Agent;
use url::Url;

use crate::config::SheetsConfig;
use crate::services::http::{build_agent, describe_error, run_blocking};
use crate::storage::models::{Partner, PostbackEvent};
use crate::utils::format_timestamp;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// assertion 有效期（Google 上限 1 小时）
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// 距过期不足该秒数的 token 视为失效
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const TOKEN_CACHE_MAX_CAPACITY: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Appended,
    NotConfigured,
}

#[async_trait]
pub trait SheetExporter: Send + Sync {
    async fn export(&self, event: &PostbackEvent, partner: &Partner)
    -> anyhow::Result<ExportOutcome>;
}

/// service account 凭据中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccount {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let account: ServiceAccount =
            serde_json::from_str(raw).context("invalid service account JSON")?;
        if account.client_email.trim().is_empty() || account.private_key.trim().is_empty() {
            return Err(anyhow!("service account is missing client_email or private_key"));
        }
        Ok(account)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// 生成 RS256 签名的 JWT assertion
pub fn build_assertion(account: &ServiceAccount, now: i64) -> anyhow::Result<String> {
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
        .context("invalid service account private key")?;
    let claims = AssertionClaims {
        iss: &account.client_email,
        scope: SHEETS_SCOPE,
        aud: &account.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

/// `{api_base}/v4/spreadsheets/{id}/values/{sheet}!A1:append?valueInputOption=USER_ENTERED`
pub fn append_url(api_base: &str, spreadsheet_id: &str, sheet_name: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(api_base).with_context(|| format!("invalid sheets api base '{}'", api_base))?;
    let range = format!("{}!A1:append", sheet_name);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("sheets api base '{}' cannot be a base URL", api_base))?;
        segments
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range.as_str()]);
    }
    url.query_pairs_mut()
        .append_pair("valueInputOption", "USER_ENTERED");
    Ok(url)
}

/// 导出的列：时间、合作方、click id、金额、映射金额、IP、方法、URL、其余参数
pub fn row_values(event: &PostbackEvent) -> Vec<serde_json::Value> {
    use serde_json::Value;

    let extra = serde_json::to_string(&event.extra_params).unwrap_or_default();
    vec![
        Value::from(format_timestamp(&event.timestamp)),
        Value::from(event.partner_id.clone()),
        Value::from(event.click_id.clone().unwrap_or_default()),
        event.sum.map(Value::from).unwrap_or_else(|| Value::from("")),
        Value::from(event.sum_mapping),
        Value::from(event.client_ip.clone().unwrap_or_default()),
        Value::from(event.method.clone()),
        Value::from(event.url.clone()),
        Value::from(extra),
    ]
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - TOKEN_REFRESH_MARGIN_SECS > now
    }
}

pub struct GoogleSheetsExporter {
    agent: Agent,
    api_base: String,
    timeout: Duration,
    /// client_email → access token
    tokens: Cache<String, CachedToken>,
}

impl GoogleSheetsExporter {
    pub fn new(config: &SheetsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let tokens = Cache::builder()
            .max_capacity(TOKEN_CACHE_MAX_CAPACITY)
            .time_to_live(Duration::from_secs(ASSERTION_LIFETIME_SECS as u64))
            .build();

        Self {
            agent: build_agent(timeout),
            api_base: config.api_base.clone(),
            timeout,
            tokens,
        }
    }

    fn fetch_token_sync(agent: Agent, account: ServiceAccount) -> anyhow::Result<CachedToken> {
        let now = Utc::now().timestamp();
        let assertion = build_assertion(&account, now)?;

        let resp = agent
            .post(&account.token_uri)
            .send_form([("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .map_err(|e| anyhow!(describe_error("Google token exchange", e)))?;

        let token: TokenResponse = resp
            .into_body()
            .read_json()
            .context("Google token response parse failed")?;

        trace!("Obtained Google access token for {}", account.client_email);
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS),
        })
    }

    async fn access_token(&self, account: &ServiceAccount) -> anyhow::Result<String> {
        let key = account.client_email.clone();
        let now = Utc::now().timestamp();

        if let Some(cached) = self.tokens.get(&key).await {
            if cached.is_fresh(now) {
                return Ok(cached.access_token);
            }
            self.tokens.invalidate(&key).await;
        }

        let agent = self.agent.clone();
        let owned = account.clone();
        let timeout = self.timeout;
        let token = self
            .tokens
            .try_get_with(key, async move {
                run_blocking("Google token exchange", timeout, move || {
                    Self::fetch_token_sync(agent, owned)
                })
                .await
            })
            .await
            .map_err(|e| anyhow!("{}", e))?;

        Ok(token.access_token)
    }

    fn append_sync(
        agent: Agent,
        url: Url,
        access_token: String,
        row: Vec<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({ "values": [row] });
        agent
            .post(url.as_str())
            .header("Authorization", format!("Bearer {}", access_token))
            .send_json(&body)
            .map_err(|e| anyhow!(describe_error("Google Sheets append", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SheetExporter for GoogleSheetsExporter {
    async fn export(
        &self,
        event: &PostbackEvent,
        partner: &Partner,
    ) -> anyhow::Result<ExportOutcome> {
        let Some((spreadsheet_id, sheet_name)) = partner.sheets.target() else {
            return Ok(ExportOutcome::NotConfigured);
        };

        let Some(raw_account) = partner
            .sheets
            .service_account_json
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        else {
            debug!(
                "Google Sheets target set for partner {} but no service account configured",
                partner.id
            );
            return Ok(ExportOutcome::NotConfigured);
        };

        let account = ServiceAccount::from_json(raw_account)?;
        let url = append_url(&self.api_base, spreadsheet_id, sheet_name)?;
        let token = self.access_token(&account).await?;
        let row = row_values(event);
        let agent = self.agent.clone();

        run_blocking("Google Sheets append", self.timeout, move || {
            Self::append_sync(agent, url, token, row)
        })
        .await?;

        debug!(
            "Appended postback for partner {} to sheet {}",
            partner.id, sheet_name
        );
        Ok(ExportOutcome::Appended)
    }
}
