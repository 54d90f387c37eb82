// 业务通知服务
// 订单支付完成后向业务系统推送通知，包含重试机制和签名

use crate::models::{NotifyRequest, Order};
use crate::services::CompletionHook;
use crate::utils::sign_notify_payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// 签名请求头
pub const SIGNATURE_HEADER: &str = "X-Unipay-Signature";
/// 投递ID请求头
pub const DELIVERY_HEADER: &str = "X-Unipay-Delivery";

/// 推送给业务系统的通知内容
#[derive(Debug, Serialize)]
pub struct PaidNotification<'a> {
    pub event: &'static str,
    pub notify: &'a NotifyRequest,
    pub order: &'a Order,
    pub timestamp: DateTime<Utc>,
}

/// HTTP业务通知
pub struct HttpCompletionHook {
    client: Client,
    url: String,
    secret: String,
    retry_delays: Vec<Duration>,
}

impl HttpCompletionHook {
    /// 创建新的通知服务实例
    ///
    /// # Arguments
    /// * `url` - 业务系统接收通知的地址
    /// * `secret` - 签名密钥
    /// * `max_retries` - 最大重试次数
    pub fn new(url: impl Into<String>, secret: impl Into<String>, max_retries: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Unipay-Notify/1.0")
            .build()
            .context("Failed to create HTTP client")?;

        // 指数退避重试策略: 5s, 15s, 45s, 135s, 405s
        let retry_delays = [5, 15, 45, 135, 405]
            .iter()
            .cycle()
            .take(max_retries)
            .map(|secs| Duration::from_secs(*secs))
            .collect();

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
            retry_delays,
        })
    }

    /// 自定义重试间隔
    pub fn with_retry_delays(mut self, retry_delays: Vec<Duration>) -> Self {
        self.retry_delays = retry_delays;
        self
    }

    /// 单次发送尝试
    async fn send_attempt(&self, delivery_id: &str, payload: &str) -> Result<u16> {
        let signature = sign_notify_payload(payload, &self.secret)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature)?);
        headers.insert(DELIVERY_HEADER, HeaderValue::from_str(delivery_id)?);

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .body(payload.to_string())
            .send()
            .await
            .context("Failed to send notification")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("business endpoint responded with {}: {}", status.as_u16(), body);
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl CompletionHook for HttpCompletionHook {
    async fn on_paid(&self, notify: &NotifyRequest, order: &Order) -> Result<()> {
        let delivery_id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&PaidNotification {
            event: "order.paid",
            notify,
            order,
            timestamp: Utc::now(),
        })
        .context("Failed to serialize notification")?;

        let attempts = self.retry_delays.len() + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.send_attempt(&delivery_id, &payload).await {
                Ok(status) => {
                    log::info!(
                        "Notification for order {} delivered ({}) after {} attempts",
                        order.id,
                        status,
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(e) => {
                    if let Some(delay) = self.retry_delays.get(attempt) {
                        log::warn!(
                            "Notification for order {} attempt {} failed, retrying in {:?}: {}",
                            order.id,
                            attempt + 1,
                            delay,
                            e
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string());
        anyhow::bail!("Notification for order {} failed after {} attempts: {}", order.id, attempts, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelType, NewOrder};
    use crate::utils::verify_hmac_signature;
    use rust_decimal_macros::dec;
    use wiremock::{
        matchers::{header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn paid_order() -> Order {
        let mut order = NewOrder {
            id: "ORDER0000000000000001".to_string(),
            channel_id: "alipay".to_string(),
            channel_type: ChannelType::Normal,
            business_ids: ["u1".to_string(), String::new(), String::new()],
            subject: "vip".to_string(),
            currency: "CNY".to_string(),
            amount_yuan: dec!(12.50),
            amount_fen: 1250,
            receiving_address: None,
            expected_token_amount: None,
            timeout: chrono::Duration::minutes(30),
        }
        .into_order(Utc::now());
        order.state = crate::models::OrderState::Paid;
        order.trade_id = Some("T100".to_string());
        order
    }

    #[tokio::test]
    async fn test_notification_is_signed_and_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/paid"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/paid"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let hook = HttpCompletionHook::new(format!("{}/paid", server.uri()), "secret", 3)
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(10); 3]);
        let order = paid_order();
        hook.on_paid(&NotifyRequest::from(&order), &order).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);

        let last = &requests[1];
        let body = String::from_utf8(last.body.clone()).unwrap();
        let signature = last.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        let hex = signature.strip_prefix("sha256=").unwrap();
        assert!(verify_hmac_signature(&body, hex, "secret").unwrap());

        let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(payload["event"], "order.paid");
        assert_eq!(payload["order"]["trade_id"], "T100");
        assert_eq!(payload["notify"]["business_id1"], "u1");
    }

    #[tokio::test]
    async fn test_notification_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let hook = HttpCompletionHook::new(server.uri(), "secret", 2)
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(5); 2]);
        let order = paid_order();
        let err = hook.on_paid(&NotifyRequest::from(&order), &order).await.unwrap_err();

        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}
