//! HTTP 接口：postback 接入与健康检查

pub mod services;

use std::sync::Arc;

use actix_web::web;

use crate::storage::SeaOrmStorage;
use services::{PostbackState, health_routes, postback_routes};

/// 注册全部路由与共享状态
pub fn configure(
    cfg: &mut web::ServiceConfig,
    storage: Arc<SeaOrmStorage>,
    postback: web::Data<PostbackState>,
    postback_path: &str,
) {
    cfg.app_data(web::Data::new(storage))
        .app_data(postback)
        .service(health_routes())
        .service(postback_routes(postback_path));
}
