// CORS中间件配置
// 下单和订单查询接口可能由前端页面直接调用

use actix_cors::Cors;
use actix_web::http::header;

/// 创建CORS中间件
///
/// # Arguments
/// * `allowed_origins` - 允许的源列表，为空时只允许本机访问
pub fn create_cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(super::REQUEST_ID_HEADER),
        ])
        .expose_headers(vec![header::HeaderName::from_static(super::REQUEST_ID_HEADER)])
        .max_age(3600);

    if allowed_origins.is_empty() {
        return cors.allowed_origin_fn(|origin, _req_head| {
            let origin = origin.as_bytes();
            origin.starts_with(b"http://localhost")
                || origin.starts_with(b"https://localhost")
                || origin.starts_with(b"http://127.0.0.1")
                || origin.starts_with(b"https://127.0.0.1")
        });
    }

    allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}
