use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use tracing::{error, trace};

use crate::storage::{QueueCounts, QueueStore, SeaOrmStorage};

const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u32,
}

/// Health Service
///
/// 直接检查存储：数据库 ping 加上各状态的队列条目数。
pub struct HealthService;

impl HealthService {
    pub async fn health_check(storage: web::Data<Arc<SeaOrmStorage>>) -> impl Responder {
        let start_time = Instant::now();
        trace!("Received health check request");

        let check = async {
            storage.ping().await?;
            storage.counts().await
        };

        let (queue, error) =
            match tokio::time::timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS), check).await
            {
                Ok(Ok(counts)) => (Some(counts), None),
                Ok(Err(e)) => {
                    error!("Storage health check failed: {}", e);
                    (None, Some(format!("database error: {}", e)))
                }
                Err(_) => {
                    error!("Storage health check timeout");
                    (None, Some("timeout".to_string()))
                }
            };

        let is_healthy = error.is_none();
        let body = HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" },
            backend: storage.backend_name().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            queue,
            error,
            response_time_ms: start_time.elapsed().as_millis() as u32,
        };

        let status = if is_healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        HttpResponse::build(status).json(body)
    }

    // 活跃性检查
    pub async fn liveness_check() -> impl Responder {
        HttpResponse::NoContent().finish()
    }
}

/// Health 路由配置
pub fn health_routes() -> actix_web::Scope {
    web::scope("/health")
        .route("", web::get().to(HealthService::health_check))
        .route("", web::head().to(HealthService::health_check))
        .route("/live", web::get().to(HealthService::liveness_check))
}
