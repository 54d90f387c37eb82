// API路由配置
// 定义所有HTTP接口的路由规则

use crate::handlers::*;
use actix_web::{web, Scope};

/// API v1路由配置
pub fn api_v1_routes() -> Scope {
    web::scope("/api/v1")
        .route("/pay", web::post().to(req_pay))
        .route("/orders/{order_id}", web::get().to(get_order))
        .service(notify_routes())
}

/// 渠道回调路由 (渠道可能以GET或POST推送)
fn notify_routes() -> Scope {
    web::scope("/notify")
        .route("/{channel_id}/{order_id}", web::get().to(notify_pay))
        .route("/{channel_id}/{order_id}", web::post().to(notify_pay))
}

/// 公共路由
pub fn public_routes() -> Scope {
    web::scope("").route("/health", web::get().to(health_check))
}
