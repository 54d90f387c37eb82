// 渠道回调API处理器
// 原样接收渠道推送的查询串和请求体，应答内容按渠道配置原样返回

use crate::models::{InboundBody, NotifyQuery, NotifyRequest};
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError, Result as ActixResult};

/// 渠道回调
///
/// GET|POST /api/v1/notify/{channel_id}/{order_id}
///
/// 查询参数: business_id1..3 (下单时写入回调地址)
/// 响应: 渠道配置的应答内容；处理失败时返回非2xx以便渠道重发
pub async fn notify_pay(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<NotifyQuery>,
    body: web::Bytes,
    req: HttpRequest,
) -> ActixResult<HttpResponse> {
    let (channel_id, order_id) = path.into_inner();
    let query = query.into_inner();

    let notify = NotifyRequest {
        channel_id,
        order_id,
        business_id1: query.business_id1,
        business_id2: query.business_id2,
        business_id3: query.business_id3,
    };
    let inbound = InboundBody {
        query: req.query_string().to_string(),
        body: body.to_vec(),
    };

    log::info!(
        "Notify received for order {} on channel {} ({} bytes)",
        notify.order_id,
        notify.channel_id,
        inbound.body.len()
    );

    let order_id = notify.order_id.clone();
    match data.pay_service.notify_pay(notify, inbound).await {
        Ok(reply) => Ok(HttpResponse::Ok().content_type(reply.content_type).body(reply.body)),
        Err(e) => {
            log::error!("Failed to handle notify for order {}: {}", order_id, e);
            Ok(e.error_response())
        }
    }
}
