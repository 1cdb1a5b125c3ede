use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{StaticConfig, get_config};
use crate::services::{
    GoogleSheetsExporter, IngestionGate, ProcessorConfig, QueueProcessor, QueueRetentionTask,
    TelegramNotifier,
};
use crate::storage::{SeaOrmStorage, StorageFactory};

pub struct StartupContext {
    pub storage: Arc<SeaOrmStorage>,
    pub gate: Arc<IngestionGate>,
    pub processor: Arc<QueueProcessor>,
    pub retention: Arc<QueueRetentionTask>,
}

/// 按配置组装服务
pub fn build_services(storage: Arc<SeaOrmStorage>, config: &StaticConfig) -> StartupContext {
    let gate = Arc::new(IngestionGate::new(storage.clone(), storage.clone()));

    let processor = QueueProcessor::new(
        storage.clone(),
        Arc::new(TelegramNotifier::new(&config.notifier)),
        Arc::new(GoogleSheetsExporter::new(&config.sheets)),
        ProcessorConfig::from(&config.queue),
    )
    .with_global_defaults(&config.notifier);

    let retention = QueueRetentionTask::new(storage.clone(), &config.queue);

    StartupContext {
        storage,
        gate,
        processor: Arc::new(processor),
        retention: Arc::new(retention),
    }
}

/// 安装 rustls 默认加密实现（重复安装时忽略）
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

/// 创建存储并组装服务
pub async fn prepare_startup() -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    install_crypto_provider();

    let config = get_config();
    let storage = StorageFactory::create()
        .await
        .context("Failed to create storage backend")?;
    info!("Using storage backend: {}", storage.backend_name());

    let context = build_services(storage, &config);

    debug!("Pre-startup completed in {:?}", start_time.elapsed());
    Ok(context)
}
