use std::sync::Arc;

use actix_web::http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use actix_web::http::{Method, StatusCode};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::services::{InboundRequest, IngestionGate, RequestParams};
use crate::utils::ip::{extract_client_ip, is_trusted_proxy};

/// 接入成功时的提示
pub const ACCEPTED_MESSAGE: &str = "Postback received and queued for processing";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostbackResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<i64>,
}

/// Postback 处理器共享状态
pub struct PostbackState {
    pub gate: Arc<IngestionGate>,
    pub trusted_proxies: Vec<String>,
}

pub struct PostbackService;

impl PostbackService {
    pub async fn handle_postback(
        req: HttpRequest,
        body: web::Bytes,
        state: web::Data<PostbackState>,
    ) -> impl Responder {
        trace!("Received postback: {} {}", req.method(), req.uri());

        let inbound = InboundRequest {
            method: req.method().to_string(),
            url: Self::request_url(&req, &state.trusted_proxies),
            client_ip: extract_client_ip(&req, &state.trusted_proxies),
            user_agent: req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            params: Self::request_params(&req, &body),
        };

        match state.gate.ingest(inbound).await {
            Ok(receipt) => HttpResponse::Ok().json(PostbackResponse {
                success: true,
                message: ACCEPTED_MESSAGE.to_string(),
                queue_id: Some(receipt.queue_id),
            }),
            Err(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                HttpResponse::build(status).json(PostbackResponse {
                    success: false,
                    message: e.public_message().to_string(),
                    queue_id: None,
                })
            }
        }
    }

    /// query 参数，POST 时再按 Content-Type 解析 body
    fn request_params(req: &HttpRequest, body: &[u8]) -> RequestParams {
        let params = RequestParams::from_query_str(req.query_string());
        if req.method() != Method::POST || body.is_empty() {
            return params;
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            params.with_json_body(body)
        } else {
            params.with_form_body(&String::from_utf8_lossy(body))
        }
    }

    /// scheme://host + 原始请求路径与 query
    ///
    /// Forwarded / X-Forwarded-Host / X-Forwarded-Proto 仅在对端为可信代理时生效
    fn request_url(req: &HttpRequest, trusted_proxies: &[String]) -> String {
        let from_proxy = !trusted_proxies.is_empty()
            && req
                .peer_addr()
                .is_some_and(|peer| is_trusted_proxy(&peer.ip().to_string(), trusted_proxies));

        if from_proxy {
            let conn = req.connection_info();
            return format!("{}://{}{}", conn.scheme(), conn.host(), req.uri());
        }

        let config = req.app_config();
        let scheme = if config.secure() { "https" } else { "http" };
        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_else(|| config.host());
        format!("{}://{}{}", scheme, host, req.uri())
    }
}

/// Postback 路由（GET 与 POST）
pub fn postback_routes(path: &str) -> actix_web::Resource {
    web::resource(path)
        .route(web::get().to(PostbackService::handle_postback))
        .route(web::post().to(PostbackService::handle_postback))
}
