//! Server mode
//!
//! 启动 HTTP 服务，并在同一进程中运行队列处理与清理任务。

use std::time::Duration;

use actix_web::{
    App, HttpServer,
    middleware::{Compress, DefaultHeaders},
    web,
};
use anyhow::Result;
use tracing::{info, warn};

use crate::api;
use crate::api::services::PostbackState;
use crate::config::get_config;
use crate::runtime::lifetime;

/// 请求体上限
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Run the HTTP server
///
/// **Note**: Logging system must be initialized before calling this function
pub async fn run_server() -> Result<()> {
    let startup = lifetime::startup::prepare_startup().await.map_err(|e| {
        tracing::error!("Server startup failed: {}", e);
        e
    })?;

    let config = get_config();

    if config.queue.enable_worker {
        startup
            .processor
            .clone()
            .spawn_background_task(config.queue.poll_interval_secs);
    } else {
        info!("In-process queue worker disabled, run `process-queue` from cron instead");
    }
    startup
        .retention
        .clone()
        .spawn_background_task(config.queue.cleanup_interval_hours);

    if !config.server.trusted_proxies.is_empty() {
        warn!(
            "Trusted proxies configured: {:?}",
            config.server.trusted_proxies
        );
    }

    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    let storage = startup.storage.clone();
    let postback_state = web::Data::new(PostbackState {
        gate: startup.gate.clone(),
        trusted_proxies: config.server.trusted_proxies.clone(),
    });
    let postback_path = config.server.postback_path.clone();
    let db_for_shutdown = storage.get_db().clone();

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    warn!(
        "Starting server at http://{} (postback endpoint: {})",
        bind_address, postback_path
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(DefaultHeaders::new().add(("Cache-Control", "no-cache, no-store, must-revalidate")))
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .configure(|cfg| {
                api::configure(
                    cfg,
                    storage.clone(),
                    postback_state.clone(),
                    &postback_path,
                )
            })
    })
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_millis(5000))
    .workers(cpu_count)
    .bind(bind_address)?
    .run();

    tokio::select! {
        res = server => {
            res?;
        }
        _ = lifetime::shutdown::listen_for_shutdown(db_for_shutdown) => {
            warn!("Graceful shutdown completed");
        }
    }

    Ok(())
}
