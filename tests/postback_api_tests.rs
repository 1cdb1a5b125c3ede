//! Postback endpoint tests
//!
//! Drives the actix routes end to end against a temporary SQLite database.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use async_trait::async_trait;
use postback_tracker::api::configure;
use postback_tracker::api::services::postback::ACCEPTED_MESSAGE;
use postback_tracker::api::services::{PostbackResponse, PostbackState};
use postback_tracker::config::DatabaseConfig;
use postback_tracker::errors::{Result, TrackerError};
use postback_tracker::services::{
    ExportOutcome, IngestionGate, Notifier, NotifyOutcome, ProcessorConfig, QueueProcessor,
    SheetExporter,
};
use postback_tracker::storage::models::GlobalTelegramSettings;
use postback_tracker::storage::{Partner, PartnerRegistry, PostbackEvent, QueueStore, SeaOrmStorage};
use tempfile::TempDir;

const PATH: &str = "/postback";

async fn create_temp_storage() -> (Arc<SeaOrmStorage>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let config = DatabaseConfig {
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        ..DatabaseConfig::default()
    };

    let storage = SeaOrmStorage::new(&config)
        .await
        .expect("Failed to create storage");

    (Arc::new(storage), temp_dir)
}

fn state_for(
    storage: &Arc<SeaOrmStorage>,
    trusted_proxies: Vec<String>,
) -> web::Data<PostbackState> {
    web::Data::new(PostbackState {
        gate: Arc::new(IngestionGate::new(storage.clone(), storage.clone())),
        trusted_proxies,
    })
}

fn peer(addr: &str) -> std::net::SocketAddr {
    addr.parse().unwrap()
}

struct FailingRegistry;

#[async_trait]
impl PartnerRegistry for FailingRegistry {
    async fn get_partner(&self, _id: &str) -> Result<Option<Partner>> {
        Err(TrackerError::database_operation("connection refused"))
    }
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(
        &self,
        _event: &PostbackEvent,
        _partner: &Partner,
        _global: &GlobalTelegramSettings,
    ) -> anyhow::Result<NotifyOutcome> {
        Ok(NotifyOutcome::NotConfigured)
    }
}

struct SilentExporter;

#[async_trait]
impl SheetExporter for SilentExporter {
    async fn export(
        &self,
        _event: &PostbackEvent,
        _partner: &Partner,
    ) -> anyhow::Result<ExportOutcome> {
        Ok(ExportOutcome::NotConfigured)
    }
}

macro_rules! init_app {
    ($storage:expr, $state:expr) => {{
        let storage = $storage.clone();
        let state = $state.clone();
        test::init_service(App::new().configure(move |cfg| configure(cfg, storage, state, PATH)))
            .await
    }};
}

// =============================================================================
// Rejections
// =============================================================================

#[actix_rt::test]
async fn test_missing_partner_id_returns_400() {
    let (storage, _dir) = create_temp_storage().await;
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?clickid=abc")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: PostbackResponse = test::read_body_json(resp).await;
    assert!(!body.success);
    assert_eq!(body.message, "Partner ID is required");
    assert!(body.queue_id.is_none());
}

#[actix_rt::test]
async fn test_unknown_partner_returns_404() {
    let (storage, _dir) = create_temp_storage().await;
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=ghost")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: PostbackResponse = test::read_body_json(resp).await;
    assert_eq!(body.message, "Partner not found");
}

#[actix_rt::test]
async fn test_ip_whitelist_rejects_without_queueing() {
    let (storage, _dir) = create_temp_storage().await;
    let mut partner = Partner::new("acme", "Acme");
    partner.ip_whitelist_enabled = true;
    partner.allowed_ips = vec!["9.9.9.9".to_string()];
    storage.upsert_partner(&partner).await.unwrap();

    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=abc")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let body: PostbackResponse = test::read_body_json(resp).await;
    assert_eq!(body.message, "IP not allowed");

    let counts = storage.counts().await.unwrap();
    assert_eq!(counts.pending, 0);
}

#[actix_rt::test]
async fn test_trusted_proxy_forwarded_ip_is_whitelisted() {
    let (storage, _dir) = create_temp_storage().await;
    let mut partner = Partner::new("acme", "Acme");
    partner.ip_whitelist_enabled = true;
    partner.allowed_ips = vec!["9.9.9.9".to_string()];
    storage.upsert_partner(&partner).await.unwrap();

    let state = state_for(&storage, vec!["10.0.0.0/8".to_string()]);
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=abc")
        .insert_header(("X-Forwarded-For", "9.9.9.9, 10.0.0.7"))
        .peer_addr(peer("10.0.0.5:443"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // 非可信对端的 X-Forwarded-For 被忽略
    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=def")
        .insert_header(("X-Forwarded-For", "9.9.9.9"))
        .peer_addr(peer("1.2.3.4:443"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn test_forwarded_host_only_from_trusted_proxy() {
    let (storage, _dir) = create_temp_storage().await;
    storage
        .upsert_partner(&Partner::new("acme", "Acme"))
        .await
        .unwrap();
    let state = state_for(&storage, vec!["10.0.0.0/8".to_string()]);
    let app = init_app!(storage, state);

    let stored_url = |queue_id: i64| {
        let storage = storage.clone();
        async move {
            let entry = storage.get_entry(queue_id).await.unwrap().unwrap();
            PostbackEvent::from_json(&entry.data).unwrap().url
        }
    };

    // 任意客户端伪造的转发头不影响记录的 URL
    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=abc")
        .insert_header(("X-Forwarded-Host", "evil.example"))
        .insert_header(("X-Forwarded-Proto", "https"))
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: PostbackResponse = test::read_body_json(resp).await;
    let url = stored_url(body.queue_id.expect("queue id")).await;
    assert!(!url.contains("evil.example"));
    assert!(url.starts_with("http://"));
    assert!(url.ends_with("/postback?pid=acme&clickid=abc"));

    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=def")
        .insert_header(("X-Forwarded-Host", "track.example"))
        .insert_header(("X-Forwarded-Proto", "https"))
        .peer_addr(peer("10.0.0.5:443"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: PostbackResponse = test::read_body_json(resp).await;
    let url = stored_url(body.queue_id.expect("queue id")).await;
    assert_eq!(url, "https://track.example/postback?pid=acme&clickid=def");
}

#[actix_rt::test]
async fn test_partner_id_is_not_trimmed() {
    let (storage, _dir) = create_temp_storage().await;
    storage
        .upsert_partner(&Partner::new("acme", "Acme"))
        .await
        .unwrap();
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=%20acme")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(storage.counts().await.unwrap().pending, 0);
}

#[actix_rt::test]
async fn test_registry_failure_returns_500() {
    let (storage, _dir) = create_temp_storage().await;
    let state = web::Data::new(PostbackState {
        gate: Arc::new(IngestionGate::new(Arc::new(FailingRegistry), storage.clone())),
        trusted_proxies: Vec::new(),
    });
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=acme")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: PostbackResponse = test::read_body_json(resp).await;
    assert!(!body.success);
    assert_eq!(body.message, "Database error");
}

#[actix_rt::test]
async fn test_unsupported_method_returns_405() {
    let (storage, _dir) = create_temp_storage().await;
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::put()
        .uri("/postback?pid=acme")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Accepted postbacks
// =============================================================================

#[actix_rt::test]
async fn test_get_postback_is_queued() {
    let (storage, _dir) = create_temp_storage().await;
    storage
        .upsert_partner(&Partner::new("acme", "Acme"))
        .await
        .unwrap();
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get()
        .uri("/postback?pid=acme&clickid=abc&sum=12.5&geo=US")
        .insert_header(("User-Agent", "network-bot/1.0"))
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: PostbackResponse = test::read_body_json(resp).await;
    assert!(body.success);
    assert_eq!(body.message, ACCEPTED_MESSAGE);
    let queue_id = body.queue_id.expect("queue id");

    let entry = storage.get_entry(queue_id).await.unwrap().unwrap();
    assert_eq!(entry.partner_id, "acme");
    let event = PostbackEvent::from_json(&entry.data).unwrap();
    assert_eq!(event.click_id.as_deref(), Some("abc"));
    assert_eq!(event.sum, Some(12.5));
    assert_eq!(event.method, "GET");
    assert_eq!(event.client_ip.as_deref(), Some("1.2.3.4"));
    assert_eq!(event.user_agent.as_deref(), Some("network-bot/1.0"));
    assert!(event.url.ends_with("/postback?pid=acme&clickid=abc&sum=12.5&geo=US"));
    assert!(event.extra_params.contains_key("geo"));
}

#[actix_rt::test]
async fn test_form_post_end_to_end() {
    let (storage, _dir) = create_temp_storage().await;
    storage
        .upsert_partner(&Partner::new("acme", "Acme"))
        .await
        .unwrap();
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::post()
        .uri("/postback")
        .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
        .set_payload("pid=acme&clickid=xyz&sum=5")
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let processor = QueueProcessor::new(
        storage.clone(),
        Arc::new(SilentNotifier),
        Arc::new(SilentExporter),
        ProcessorConfig::default(),
    );
    let report = processor.run_batch(10).await.unwrap();
    assert_eq!(report.completed, 1);

    let rows = storage.detailed_for("acme").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].click_id.as_deref(), Some("xyz"));
    assert_eq!(rows[0].sum, Some(5.0));
    assert_eq!(rows[0].sum_mapping, 0.0);
    assert_eq!(rows[0].method, "POST");

    let summary = storage.summary_for("acme").await.unwrap().unwrap();
    assert_eq!(summary.total_requests, 1);
    assert_eq!(summary.successful_redirects, 1);
}

#[actix_rt::test]
async fn test_json_post_body_is_read() {
    let (storage, _dir) = create_temp_storage().await;
    storage
        .upsert_partner(&Partner::new("acme", "Acme"))
        .await
        .unwrap();
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::post()
        .uri("/postback?pid=acme")
        .set_json(serde_json::json!({ "clickid": "json-1", "payout": 3 }))
        .peer_addr(peer("1.2.3.4:5000"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: PostbackResponse = test::read_body_json(resp).await;
    let entry = storage
        .get_entry(body.queue_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let event = PostbackEvent::from_json(&entry.data).unwrap();
    assert_eq!(event.click_id.as_deref(), Some("json-1"));
    assert_eq!(event.sum, Some(3.0));
}

// =============================================================================
// Health
// =============================================================================

#[actix_rt::test]
async fn test_health_reports_queue_counts() {
    let (storage, _dir) = create_temp_storage().await;
    storage.enqueue("acme", "{}").await.unwrap();
    let state = state_for(&storage, Vec::new());
    let app = init_app!(storage, state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["pending"], 1);

    let req = test::TestRequest::get().uri("/health/live").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
