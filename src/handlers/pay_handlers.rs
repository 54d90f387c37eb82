// 下单与订单查询API处理器

use crate::models::{ApiResponse, PayRequest};
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError, Result as ActixResult};

/// 下单
///
/// POST /api/v1/pay
///
/// 请求体: PayRequest
/// 响应: PayResponse
pub async fn req_pay(
    data: web::Data<AppState>,
    request: web::Json<PayRequest>,
    req: HttpRequest,
) -> ActixResult<HttpResponse> {
    let mut request = request.into_inner();

    // 未传付款人IP时使用请求来源地址
    if request.client_ip.trim().is_empty() {
        if let Some(ip) = req.connection_info().realip_remote_addr() {
            request.client_ip = ip.to_string();
        }
    }

    let channel_id = request.channel_id.clone();
    match data.pay_service.req_pay(request).await {
        Ok(response) => {
            log::info!("Order {} created on channel {}", response.order_id, channel_id);
            Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
        }
        Err(e) => {
            log::error!("Failed to create order on channel {}: {}", channel_id, e);
            Ok(e.error_response())
        }
    }
}

/// 查询订单
///
/// GET /api/v1/orders/{order_id}
pub async fn get_order(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    let order_id = path.into_inner();

    match data.pay_service.get_order(&order_id).await {
        Ok(order) => Ok(HttpResponse::Ok().json(ApiResponse::success(order))),
        Err(e) => {
            log::warn!("Failed to get order {}: {}", order_id, e);
            Ok(e.error_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;
    use actix_web::{test, App};
    use serde_json::json;

    fn app_state() -> AppState {
        let channel: Channel = serde_json::from_value(json!({
            "id": "h5",
            "name": "H5",
            "type": "normal",
            "currency": "CNY",
            "request": {"url": "http://127.0.0.1:9/order", "params": []},
            "response": {"success_expr": "code == 0"}
        }))
        .unwrap();
        AppState::new_for_test(vec![channel])
    }

    #[actix_web::test]
    async fn test_req_pay_validation_error() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .route("/api/v1/pay", web::post().to(req_pay)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/pay")
            .set_json(json!({"channel_id": "h5", "amount": "abc", "currency": "CNY"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], 400);
        assert!(body["message"].as_str().unwrap().contains("amount"));
    }

    #[actix_web::test]
    async fn test_req_pay_unknown_channel() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .route("/api/v1/pay", web::post().to(req_pay)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/pay")
            .set_json(json!({"channel_id": "missing", "amount": "1", "currency": "CNY"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_get_missing_order() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .route("/api/v1/orders/{order_id}", web::get().to(get_order)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/orders/NOPE").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
