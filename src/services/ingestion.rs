//! Postback 接入
//!
//! 校验合作方与来源 IP，提取字段，写入队列后立即返回。
//! 这里不触发任何通知或导出，只负责把事件持久化。

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::errors::TrackerError;
use crate::services::extractor::{RequestParams, extract_fields};
use crate::storage::models::PostbackEvent;
use crate::storage::traits::{PartnerRegistry, QueueStore};
use crate::utils::now_seconds;

/// 一次入站请求的快照
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    /// 完整请求 URL（scheme://host/path?query）
    pub url: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub params: RequestParams,
}

/// 请求被拒绝的原因（4xx，不会产生队列条目）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestRejection {
    MissingPartnerId,
    UnknownPartner(String),
    IpNotAllowed {
        partner_id: String,
        ip: Option<String>,
    },
}

impl IngestRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestRejection::MissingPartnerId => 400,
            IngestRejection::UnknownPartner(_) => 404,
            IngestRejection::IpNotAllowed { .. } => 403,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            IngestRejection::MissingPartnerId => "Partner ID is required",
            IngestRejection::UnknownPartner(_) => "Partner not found",
            IngestRejection::IpNotAllowed { .. } => "IP not allowed",
        }
    }
}

impl From<&IngestRejection> for TrackerError {
    fn from(rejection: &IngestRejection) -> Self {
        let detail = match rejection {
            IngestRejection::MissingPartnerId => String::new(),
            IngestRejection::UnknownPartner(id) => format!(" (partner: {})", id),
            IngestRejection::IpNotAllowed { partner_id, ip } => format!(
                " (partner: {}, ip: {})",
                partner_id,
                ip.as_deref().unwrap_or("unknown")
            ),
        };
        TrackerError::rejected(format!("{}{}", rejection.message(), detail))
    }
}

/// 接入失败
#[derive(Debug)]
pub enum IngestError {
    Rejected(IngestRejection),
    /// 合作方查询失败
    Lookup(TrackerError),
    /// 写入队列失败
    Enqueue(TrackerError),
}

impl IngestError {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::Rejected(r) => r.status_code(),
            IngestError::Lookup(_) | IngestError::Enqueue(_) => 500,
        }
    }

    /// 返回给调用方的消息
    pub fn public_message(&self) -> &'static str {
        match self {
            IngestError::Rejected(r) => r.message(),
            IngestError::Lookup(_) => "Database error",
            IngestError::Enqueue(_) => "Failed to queue postback",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Rejected(r) => write!(f, "{}", TrackerError::from(r)),
            IngestError::Lookup(e) | IngestError::Enqueue(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for IngestError {}

/// 接入成功的回执
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub queue_id: i64,
    pub event: PostbackEvent,
}

pub struct IngestionGate {
    registry: Arc<dyn PartnerRegistry>,
    queue: Arc<dyn QueueStore>,
}

impl IngestionGate {
    pub fn new(registry: Arc<dyn PartnerRegistry>, queue: Arc<dyn QueueStore>) -> Self {
        Self { registry, queue }
    }

    pub async fn ingest(&self, request: InboundRequest) -> Result<IngestReceipt, IngestError> {
        let Some(partner_id) = request.params.partner_id() else {
            return Err(IngestError::Rejected(IngestRejection::MissingPartnerId));
        };

        let partner = match self.registry.get_partner(&partner_id).await {
            Ok(Some(partner)) => partner,
            Ok(None) => {
                return Err(IngestError::Rejected(IngestRejection::UnknownPartner(
                    partner_id,
                )));
            }
            Err(e) => {
                error!("Partner lookup failed for '{}': {}", partner_id, e);
                return Err(IngestError::Lookup(e));
            }
        };

        if !partner.is_ip_allowed(request.client_ip.as_deref()) {
            let rejection = IngestRejection::IpNotAllowed {
                partner_id: partner.id.clone(),
                ip: request.client_ip.clone(),
            };
            if partner.logging_enabled {
                warn!("Unauthorized postback attempt: {}", TrackerError::from(&rejection));
            }
            return Err(IngestError::Rejected(rejection));
        }

        let fields = extract_fields(&partner, &request.params);

        let event = PostbackEvent {
            partner_id: partner.id.clone(),
            timestamp: now_seconds(),
            click_id: fields.click_id,
            url: request.url,
            client_ip: request.client_ip,
            user_agent: request.user_agent,
            method: request.method,
            sum: fields.sum,
            sum_mapping: fields.mapped_sum,
            extra_params: fields.extra_params,
        };

        let payload = event
            .to_json()
            .map_err(|e| IngestError::Enqueue(TrackerError::from(e)))?;

        let queue_id = match self.queue.enqueue(&partner.id, &payload).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to queue postback for partner '{}': {}", partner.id, e);
                return Err(IngestError::Enqueue(e));
            }
        };

        if partner.logging_enabled {
            info!(
                "Postback queued for partner {}, queue ID: {}",
                partner.id, queue_id
            );
        }

        Ok(IngestReceipt { queue_id, event })
    }
}
