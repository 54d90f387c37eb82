// 支付服务
// 负责下单分发 (普通渠道出站请求 / 链上渠道启动轮询) 和渠道回调对账

use crate::error::GatewayError;
use crate::expr::{eval_bool, eval_params, eval_string, EvalContext};
use crate::models::{
    Channel, ChannelType, InboundBody, LogEntry, LogLevel, NewOrder, NotifyReply, NotifyRequest, Order, PayRequest,
    PayResponse, Transition,
};
use crate::services::{
    spawn_completion, ChainWatcher, ChannelStore, ChannelTransport, CompletionHook, LogSink, OrderStore,
    OutboundRequest, RateProvider,
};
use crate::utils::{
    convert_currency, generate_order_id, generate_payment_qr_code, needs_conversion, settle_amount,
    validate_pay_request, ORDER_ID_LENGTH,
};
use chrono::{Duration, Utc};
use reqwest::Url;
use std::sync::Arc;

/// 订单号冲突时最多重新生成的次数
pub const MAX_ORDER_ID_ATTEMPTS: usize = 5;

/// 支付服务依赖的协作者
#[derive(Clone)]
pub struct PayDeps {
    pub channels: Arc<dyn ChannelStore>,
    pub orders: Arc<dyn OrderStore>,
    pub rates: Arc<dyn RateProvider>,
    pub transport: Arc<dyn ChannelTransport>,
    pub log_sink: Arc<dyn LogSink>,
    pub hook: Arc<dyn CompletionHook>,
    pub watcher: Arc<ChainWatcher>,
}

/// 支付服务
pub struct PayService {
    deps: PayDeps,
    /// 渠道回调地址前缀
    public_base_url: String,
}

impl PayService {
    /// 创建新的支付服务实例
    ///
    /// # Arguments
    /// * `deps` - 协作者
    /// * `public_base_url` - 对外访问地址，用于生成渠道回调地址
    pub fn new(deps: PayDeps, public_base_url: impl Into<String>) -> Self {
        Self {
            deps,
            public_base_url: public_base_url.into(),
        }
    }

    /// 下单
    ///
    /// # Arguments
    /// * `request` - 下单请求
    ///
    /// # Returns
    /// * 普通渠道返回支付页面地址，链上渠道返回收款地址与应付数量
    pub async fn req_pay(&self, request: PayRequest) -> Result<PayResponse, GatewayError> {
        let channel = self
            .deps
            .channels
            .get(&request.channel_id)
            .await?
            .ok_or_else(|| GatewayError::ChannelNotFound(request.channel_id.clone()))?;

        let kind = match channel.kind() {
            Ok(kind) => kind,
            Err(e) => {
                log::error!("Channel {} has unsupported type {}", channel.id, channel.channel_type);
                self.deps
                    .log_sink
                    .save(LogEntry::error("", format!("channel {}: {}", channel.id, e)))
                    .await;
                return Err(e);
            }
        };

        // 配置缺失时不落单
        match kind {
            ChannelType::Normal => {
                channel.request_template()?;
                channel.response_rule()?;
            }
            ChannelType::Erc20 | ChannelType::Trc20 => {
                channel.crypto_config()?;
            }
        }

        let amount = validate_pay_request(&request, &channel)?;
        let order_id = generate_order_id(ORDER_ID_LENGTH);

        let request_currency = request.currency.trim().to_ascii_uppercase();
        let converted = if needs_conversion(&request_currency, &channel.currency) {
            let rate = self.deps.rates.get_usd_rate(&order_id).await?;
            convert_currency(amount, &request_currency, &channel.currency, rate)?
        } else {
            amount
        };
        let settled = settle_amount(converted, channel.keep_decimal)?;
        if settled.amount_fen <= 0 {
            return Err(GatewayError::Validation(format!(
                "amount: {} {} settles to zero on channel {}",
                request.amount.trim(),
                request_currency,
                channel.id
            )));
        }

        let subject = if request.subject.trim().is_empty() {
            channel.product_name.clone()
        } else {
            request.subject.clone()
        };

        let (receiving_address, expected_token_amount) = match kind {
            ChannelType::Normal => (None, None),
            _ => (
                Some(channel.crypto_config()?.receiving_address.clone()),
                Some(settled.amount_yuan.to_string()),
            ),
        };

        let token_contract = if kind.is_crypto() {
            Some(self.deps.watcher.token_contract(kind, &channel)?)
        } else {
            None
        };

        let order = self
            .insert_with_unique_id(NewOrder {
                id: order_id,
                channel_id: channel.id.clone(),
                channel_type: kind,
                business_ids: request.business_ids(),
                subject,
                currency: channel.currency.clone(),
                amount_yuan: settled.amount_yuan,
                amount_fen: settled.amount_fen,
                receiving_address,
                expected_token_amount,
                timeout: Duration::minutes(channel.order_timeout_minutes),
            })
            .await?;

        log::info!(
            "Created order {} on channel {} ({} {})",
            order.id,
            channel.id,
            order.amount_yuan,
            order.currency
        );

        match token_contract {
            None => self.dispatch_normal(&request, &channel, order).await,
            Some(contract) => Ok(self.dispatch_crypto(kind, order, contract)),
        }
    }

    /// 写入订单，订单号冲突时重新生成
    async fn insert_with_unique_id(&self, mut new_order: NewOrder) -> Result<Order, GatewayError> {
        for attempt in 0..MAX_ORDER_ID_ATTEMPTS {
            if attempt > 0 {
                new_order.id = generate_order_id(ORDER_ID_LENGTH);
            }
            let order = new_order.clone().into_order(Utc::now());
            if self.deps.orders.insert(&order).await? {
                return Ok(order);
            }
            log::warn!("Order id {} already exists, regenerating", order.id);
        }

        log::error!(
            "Failed to allocate a unique order id after {} attempts",
            MAX_ORDER_ID_ATTEMPTS
        );
        Err(GatewayError::OrderIdExhausted)
    }

    /// 表达式上下文：请求参数 → 渠道参数 → 计算参数，后者覆盖前者
    fn build_context(&self, request: &PayRequest, channel: &Channel, order: &Order) -> EvalContext {
        let mut computed = EvalContext::new();
        computed.insert("order_id", &order.id);
        computed.insert("subject", &order.subject);
        computed.insert("currency", &order.currency);
        computed.insert("amount_yuan", order.amount_yuan);
        computed.insert("amount_fen", order.amount_fen);
        computed.insert("create_time", order.create_time.timestamp());
        computed.insert("expire_time", order.cancel_time.timestamp());
        computed.insert("notify_url", self.notify_url(channel, order));

        EvalContext::layered([
            ("request", request.to_context()),
            ("channel", channel.to_context()),
            ("computed", computed),
        ])
    }

    /// 渠道回调地址
    fn notify_url(&self, channel: &Channel, order: &Order) -> String {
        let base = format!(
            "{}/api/v1/notify/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            channel.id,
            order.id
        );
        let ids: Vec<(&str, &str)> = [
            ("business_id1", order.business_id1.as_str()),
            ("business_id2", order.business_id2.as_str()),
            ("business_id3", order.business_id3.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

        if ids.is_empty() {
            return base;
        }
        Url::parse_with_params(&base, &ids)
            .map(|url| url.to_string())
            .unwrap_or(base)
    }

    /// 普通渠道：计算参数并发送出站请求，失败时订单标记为失败
    async fn dispatch_normal(
        &self,
        request: &PayRequest,
        channel: &Channel,
        order: Order,
    ) -> Result<PayResponse, GatewayError> {
        let ctx = self.build_context(request, channel, &order);

        match self.call_channel(channel, &ctx).await {
            Ok(pay_url) => Ok(PayResponse {
                order_id: order.id,
                channel_type: order.channel_type,
                currency: order.currency,
                amount_yuan: order.amount_yuan,
                amount_fen: order.amount_fen,
                pay_url,
                receiving_address: None,
                amount_due: None,
                qr_code: None,
                expire_time: order.cancel_time,
            }),
            Err(e) => {
                let message = e.to_string();
                log::warn!("Order {} failed on channel {}: {}", order.id, channel.id, message);
                if let Err(store_err) = self.deps.orders.mark_failed(&order.id, &message).await {
                    log::error!("Failed to mark order {} as failed: {}", order.id, store_err);
                }
                self.deps.log_sink.save(LogEntry::error(&order.id, message)).await;
                Err(e)
            }
        }
    }

    async fn call_channel(&self, channel: &Channel, ctx: &EvalContext) -> Result<Option<String>, GatewayError> {
        let template = channel.request_template()?;
        let rule = channel.response_rule()?;

        let params = eval_params(
            ctx,
            template.params.iter().map(|p| (p.name.as_str(), p.expr.as_str())),
        )
        .map_err(GatewayError::Eval)?;

        // 请求头可以引用全部请求参数
        let mut scope = ctx.clone();
        for (name, value) in &params {
            scope.insert(name.clone(), value.as_str());
        }
        let headers = eval_params(
            &scope,
            template.headers.iter().map(|h| (h.name.as_str(), h.expr.as_str())),
        )
        .map_err(GatewayError::Eval)?;

        let response = self
            .deps
            .transport
            .send(&OutboundRequest {
                method: template.method,
                url: template.url.clone(),
                encoding: template.encoding,
                params,
                headers,
            })
            .await?;

        let parsed = rule
            .content_type
            .parse(&response.body)
            .map_err(|e| GatewayError::Transport(format!("unparseable channel response: {}", e)))?;
        scope.merge("response", parsed);

        if !eval_bool(&rule.success_expr, &scope).map_err(GatewayError::Eval)? {
            let message = match rule.message_expr.as_deref().map(|expr| eval_string(expr, &scope)) {
                Some(Ok(message)) if !message.is_empty() => message,
                Some(Err(e)) => format!("channel rejected the order ({})", e),
                _ => "channel rejected the order".to_string(),
            };
            return Err(GatewayError::ChannelRejected(message));
        }

        rule.pay_url_expr
            .as_deref()
            .map(|expr| eval_string(expr, &scope))
            .transpose()
            .map_err(GatewayError::Eval)
    }

    /// 链上渠道：启动轮询并立即返回收款信息
    fn dispatch_crypto(&self, kind: ChannelType, order: Order, token_contract: String) -> PayResponse {
        let address = order.receiving_address.clone().unwrap_or_default();
        let amount_due = order.expected_token_amount.clone().unwrap_or_default();

        let uri = kind.payment_uri(&address, Some(&token_contract), &amount_due);
        let qr_code = match generate_payment_qr_code(&uri) {
            Ok(qr_code) => Some(qr_code),
            Err(e) => {
                log::warn!("Failed to generate QR code for order {}: {:#}", order.id, e);
                None
            }
        };

        let response = PayResponse {
            order_id: order.id.clone(),
            channel_type: kind,
            currency: order.currency.clone(),
            amount_yuan: order.amount_yuan,
            amount_fen: order.amount_fen,
            pay_url: None,
            receiving_address: Some(address),
            amount_due: Some(amount_due),
            qr_code,
            expire_time: order.cancel_time,
        };

        self.deps.watcher.watch(order, token_contract);
        response
    }

    /// 渠道回调对账
    ///
    /// # Arguments
    /// * `notify` - 路径与查询参数中的渠道、订单、业务ID
    /// * `inbound` - 原始查询串与请求体
    ///
    /// # Returns
    /// * 渠道配置的应答内容 (原样返回)
    pub async fn notify_pay(&self, notify: NotifyRequest, inbound: InboundBody) -> Result<NotifyReply, GatewayError> {
        let channel = self
            .deps
            .channels
            .get(&notify.channel_id)
            .await?
            .ok_or_else(|| GatewayError::ChannelNotFound(notify.channel_id.clone()))?;
        let rule = channel.notify_rule()?;

        let order = self
            .deps
            .orders
            .get_by_business(&notify.order_id, notify.business_ids())
            .await?
            .filter(|order| order.channel_id == channel.id)
            .ok_or_else(|| GatewayError::OrderNotFound(notify.order_id.clone()))?;

        let reply = NotifyReply {
            content_type: rule.return_content_type.mime(),
            body: rule.return_content.clone(),
        };

        // 渠道重复推送
        if order.is_terminal() {
            log::info!("Order {} already {}, acknowledging notify", order.id, order.state.as_str());
            return Ok(reply);
        }

        let ctx = rule
            .content_type
            .parse(&inbound.query, &inbound.body)
            .map_err(GatewayError::Validation)?;

        let paid = eval_bool(&rule.pay_success_expr, &ctx).map_err(GatewayError::NotifyEval)?;
        if !paid {
            log::info!("Channel {} reported order {} as not paid", channel.id, order.id);
            self.deps
                .log_sink
                .save(LogEntry::new(&order.id, LogLevel::Warn, "channel notify reported payment not successful"))
                .await;
            return Ok(reply);
        }

        let trade_id = rule
            .pay_id_expr
            .as_deref()
            .map(|expr| eval_string(expr, &ctx))
            .transpose()
            .map_err(GatewayError::NotifyEval)?;

        match self.deps.orders.mark_paid(&order.id, trade_id, Utc::now()).await? {
            Transition::Applied(paid) => {
                log::info!("Order {} paid via channel {} notify", paid.id, channel.id);
                self.deps
                    .log_sink
                    .save(LogEntry::info(&paid.id, format!("paid via {} notify", channel.id)))
                    .await;
                spawn_completion(Arc::clone(&self.deps.hook), notify, paid);
            }
            Transition::AlreadyTerminal(current) => {
                log::info!("Order {} was finished concurrently ({})", current.id, current.state.as_str());
            }
        }

        Ok(reply)
    }

    /// 查询订单
    pub async fn get_order(&self, order_id: &str) -> Result<Order, GatewayError> {
        self.deps
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderState, TransferPage};
    use crate::services::{
        ChainWatcher, FixedRateProvider, HttpChannelTransport, LoggingBackupHandler, MemoryChannelStore,
        MemoryOrderStore, StdLogSink, TransferError, TransferQuery, TransferSource, WatcherSettings,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const TRON_ADDRESS: &str = "TU8fjcJFpgGd2q9roMBmv5c9wo7q2Pwt2d";

    struct EmptySource;

    #[async_trait]
    impl TransferSource for EmptySource {
        fn endpoint(&self, _query: &TransferQuery<'_>) -> String {
            "mock://empty".to_string()
        }

        async fn fetch_transfers(&self, _query: &TransferQuery<'_>) -> Result<TransferPage, TransferError> {
            Ok(TransferPage::default())
        }
    }

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionHook for CountingHook {
        async fn on_paid(&self, _notify: &NotifyRequest, _order: &Order) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 原样返回渠道配置，不做加载校验
    struct RawChannels(HashMap<String, Channel>);

    #[async_trait]
    impl ChannelStore for RawChannels {
        async fn get(&self, id: &str) -> Result<Option<Channel>, GatewayError> {
            Ok(self.0.get(id).cloned())
        }
    }

    /// 所有订单号都已被占用的存储
    struct CollidingOrders(MemoryOrderStore);

    #[async_trait]
    impl OrderStore for CollidingOrders {
        async fn insert(&self, _order: &Order) -> Result<bool, GatewayError> {
            Ok(false)
        }
        async fn get(&self, id: &str) -> Result<Option<Order>, GatewayError> {
            self.0.get(id).await
        }
        async fn get_by_business(&self, id: &str, ids: [&str; 3]) -> Result<Option<Order>, GatewayError> {
            self.0.get_by_business(id, ids).await
        }
        async fn mark_paid(
            &self,
            id: &str,
            trade_id: Option<String>,
            pay_time: DateTime<Utc>,
        ) -> Result<Transition, GatewayError> {
            self.0.mark_paid(id, trade_id, pay_time).await
        }
        async fn mark_expired(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
            self.0.mark_expired(id, message).await
        }
        async fn mark_failed(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
            self.0.mark_failed(id, message).await
        }
        async fn list_pending_crypto(&self) -> Result<Vec<Order>, GatewayError> {
            self.0.list_pending_crypto().await
        }
        async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<Order>, GatewayError> {
            self.0.find_by_trade_id(trade_id).await
        }
    }

    fn normal_channel(server_uri: &str) -> Channel {
        serde_json::from_value(json!({
            "id": "h5",
            "name": "H5 Pay",
            "type": "normal",
            "currency": "CNY",
            "keep_decimal": true,
            "product_name": "Default product",
            "min_amount": "0.01",
            "request": {
                "method": "POST",
                "url": format!("{}/gateway/order", server_uri),
                "encoding": "json",
                "params": [
                    {"name": "out_trade_no", "expr": "order_id"},
                    {"name": "total_fee", "expr": "amount_fen"},
                    {"name": "body", "expr": "subject"},
                    {"name": "notify", "expr": "notify_url"},
                    {"name": "sign", "expr": "upper(sha256(out_trade_no + total_fee + key))"}
                ],
                "headers": [{"name": "X-Mch", "expr": "mch_id"}]
            },
            "response": {
                "content_type": "json",
                "success_expr": "code == 0",
                "pay_url_expr": "data.pay_url",
                "message_expr": "msg"
            },
            "notify": {
                "content_type": "form",
                "pay_success_expr": "trade_status == 'TRADE_SUCCESS'",
                "pay_id_expr": "trade_no",
                "return_content_type": "text",
                "return_content": "success"
            },
            "static_params": [
                {"name": "mch_id", "value": "M1001"},
                {"name": "key", "value": "secret"}
            ]
        }))
        .unwrap()
    }

    fn trc20_channel() -> Channel {
        serde_json::from_value(json!({
            "id": "usdt",
            "name": "USDT",
            "type": "trc20",
            "currency": "USD",
            "keep_decimal": true,
            "crypto": {"receiving_address": TRON_ADDRESS}
        }))
        .unwrap()
    }

    struct Fixture {
        service: PayService,
        orders: Arc<MemoryOrderStore>,
        hook: Arc<CountingHook>,
    }

    fn fixture_with(channels: Arc<dyn ChannelStore>, rate: Option<rust_decimal::Decimal>) -> Fixture {
        let orders = Arc::new(MemoryOrderStore::new());
        let hook = Arc::new(CountingHook::default());
        let watcher = ChainWatcher::new(
            orders.clone(),
            channels.clone(),
            Arc::new(StdLogSink),
            Arc::new(LoggingBackupHandler),
            hook.clone(),
            WatcherSettings::default(),
        )
        .with_source(ChannelType::Trc20, Arc::new(EmptySource), "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");

        let deps = PayDeps {
            channels,
            orders: orders.clone(),
            rates: Arc::new(FixedRateProvider::new(rate)),
            transport: Arc::new(HttpChannelTransport::new(std::time::Duration::from_secs(3)).unwrap()),
            log_sink: Arc::new(StdLogSink),
            hook: hook.clone(),
            watcher: Arc::new(watcher),
        };

        Fixture {
            service: PayService::new(deps, "https://gw.example.com/"),
            orders,
            hook,
        }
    }

    fn fixture(server_uri: &str) -> Fixture {
        let channels = MemoryChannelStore::new(vec![normal_channel(server_uri), trc20_channel()]).unwrap();
        fixture_with(Arc::new(channels), Some(dec!(7.2)))
    }

    fn pay_request(channel_id: &str, amount: &str, currency: &str) -> PayRequest {
        PayRequest {
            channel_id: channel_id.to_string(),
            amount: amount.to_string(),
            currency: currency.to_string(),
            subject: String::new(),
            business_id1: "user-1".to_string(),
            business_id2: String::new(),
            business_id3: String::new(),
            return_url: String::new(),
            client_ip: "127.0.0.1".to_string(),
            extra: HashMap::new(),
        }
    }

    fn notify(order_id: &str) -> NotifyRequest {
        NotifyRequest {
            channel_id: "h5".to_string(),
            order_id: order_id.to_string(),
            business_id1: "user-1".to_string(),
            ..Default::default()
        }
    }

    fn form(body: &str) -> InboundBody {
        InboundBody {
            query: String::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    async fn mount_gateway(server: &MockServer, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/gateway/order"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_req_pay_normal_channel() {
        let server = MockServer::start().await;
        mount_gateway(&server, 200, json!({"code": 0, "data": {"pay_url": "https://pay.example.com/c/1"}})).await;
        let fx = fixture(&server.uri());

        let response = fx.service.req_pay(pay_request("h5", "12.756", "CNY")).await.unwrap();
        assert_eq!(response.pay_url.as_deref(), Some("https://pay.example.com/c/1"));
        assert_eq!(response.amount_yuan.to_string(), "12.76");
        assert_eq!(response.amount_fen, 1276);
        assert_eq!(response.order_id.len(), 20);

        let order = fx.orders.get(&response.order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Pending);
        assert_eq!(order.subject, "Default product");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].headers.get("X-Mch").unwrap().to_str().unwrap(), "M1001");
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["out_trade_no"], response.order_id.as_str());
        assert_eq!(sent["total_fee"], "1276");
        assert_eq!(
            sent["notify"],
            format!("https://gw.example.com/api/v1/notify/h5/{}?business_id1=user-1", response.order_id).as_str()
        );
        let expected_sign = crate::expr::eval_string(
            &format!("upper(sha256('{}' + '1276' + 'secret'))", response.order_id),
            &EvalContext::new(),
        )
        .unwrap();
        assert_eq!(sent["sign"], expected_sign.as_str());
    }

    #[tokio::test]
    async fn test_req_pay_converts_usd_and_truncates() {
        let server = MockServer::start().await;
        mount_gateway(&server, 200, json!({"code": 0, "data": {"pay_url": "u"}})).await;
        let mut channel = normal_channel(&server.uri());
        channel.keep_decimal = false;
        let channels = MemoryChannelStore::new(vec![channel]).unwrap();
        let fx = fixture_with(Arc::new(channels), Some(dec!(7.2)));

        let response = fx.service.req_pay(pay_request("h5", "10.3", "USD")).await.unwrap();
        // 10.3 × 7.2 = 74.16，截断为 74
        assert_eq!(response.amount_yuan.to_string(), "74");
        assert_eq!(response.amount_fen, 7400);
        assert_eq!(response.currency, "CNY");
    }

    #[tokio::test]
    async fn test_req_pay_rate_unavailable() {
        let server = MockServer::start().await;
        let channels = MemoryChannelStore::new(vec![normal_channel(&server.uri())]).unwrap();
        let fx = fixture_with(Arc::new(channels), None);

        let err = fx.service.req_pay(pay_request("h5", "10", "USD")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateUnavailable(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_req_pay_rejected_marks_order_failed() {
        let server = MockServer::start().await;
        mount_gateway(&server, 200, json!({"code": 40001, "msg": "merchant disabled"})).await;
        let fx = fixture(&server.uri());

        let err = fx.service.req_pay(pay_request("h5", "5", "CNY")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChannelRejected(ref msg) if msg == "merchant disabled"));

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let order_id = sent["out_trade_no"].as_str().unwrap();
        let order = fx.orders.get(order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Failed);
        assert_eq!(order.message.as_deref(), Some("channel rejected the order: merchant disabled"));
    }

    #[tokio::test]
    async fn test_req_pay_transport_failure_marks_order_failed() {
        let server = MockServer::start().await;
        mount_gateway(&server, 502, json!({})).await;
        let fx = fixture(&server.uri());

        let err = fx.service.req_pay(pay_request("h5", "5", "CNY")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_req_pay_validation_and_lookup_errors() {
        let server = MockServer::start().await;
        let fx = fixture(&server.uri());

        let err = fx.service.req_pay(pay_request("missing", "5", "CNY")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChannelNotFound(_)));

        let err = fx.service.req_pay(pay_request("h5", "-1", "EUR")).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(message.contains("amount"));
        assert!(message.contains("currency"));
    }

    #[tokio::test]
    async fn test_req_pay_unsupported_channel_type() {
        let mut channel = trc20_channel();
        channel.channel_type = "paypal".to_string();
        let channels = RawChannels(HashMap::from([(channel.id.clone(), channel)]));
        let fx = fixture_with(Arc::new(channels), Some(dec!(7.2)));

        let err = fx.service.req_pay(pay_request("usdt", "5", "USD")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedChannelType(ref t) if t == "paypal"));
    }

    #[tokio::test]
    async fn test_req_pay_order_id_exhausted() {
        let orders = Arc::new(CollidingOrders(MemoryOrderStore::new()));
        let channels: Arc<dyn ChannelStore> = Arc::new(MemoryChannelStore::new(vec![trc20_channel()]).unwrap());
        let mut fx = fixture_with(channels, Some(dec!(7.2)));
        fx.service.deps.orders = orders;

        let err = fx.service.req_pay(pay_request("usdt", "5", "USD")).await.unwrap_err();
        assert!(matches!(err, GatewayError::OrderIdExhausted));
    }

    #[tokio::test]
    async fn test_req_pay_crypto_channel() {
        let fx = fixture("http://127.0.0.1:9");

        let response = fx.service.req_pay(pay_request("usdt", "5", "USD")).await.unwrap();
        assert_eq!(response.receiving_address.as_deref(), Some(TRON_ADDRESS));
        assert_eq!(response.amount_due.as_deref(), Some("5.00"));
        assert!(response.qr_code.unwrap().starts_with("data:image/png;base64,"));
        assert!(response.pay_url.is_none());

        let order = fx.orders.get(&response.order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Pending);
        assert_eq!(order.expected_token_amount.as_deref(), Some("5.00"));
        assert_eq!(fx.orders.list_pending_crypto().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_req_pay_rejects_amount_settling_to_zero() {
        let server = MockServer::start().await;
        let mut truncating = normal_channel(&server.uri());
        truncating.id = "h5-int".to_string();
        truncating.keep_decimal = false;
        truncating.min_amount = None;
        let channels = MemoryChannelStore::new(vec![truncating, trc20_channel()]).unwrap();
        let fx = fixture_with(Arc::new(channels), Some(dec!(7.2)));

        // 保留两位小数后为 0.00
        let err = fx.service.req_pay(pay_request("usdt", "0.001", "USD")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(ref msg) if msg.contains("settles to zero")));

        // 截断后为 0
        let err = fx.service.req_pay(pay_request("h5-int", "0.5", "CNY")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(ref msg) if msg.contains("h5-int")));

        assert!(fx.orders.list_pending_crypto().await.unwrap().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    async fn pending_normal_order(fx: &Fixture, server: &MockServer) -> String {
        mount_gateway(server, 200, json!({"code": 0, "data": {"pay_url": "u"}})).await;
        fx.service.req_pay(pay_request("h5", "5", "CNY")).await.unwrap().order_id
    }

    #[tokio::test]
    async fn test_notify_pay_and_redelivery() {
        let server = MockServer::start().await;
        let fx = fixture(&server.uri());
        let order_id = pending_normal_order(&fx, &server).await;

        let body = "trade_status=TRADE_SUCCESS&trade_no=2024A1";
        let reply = fx.service.notify_pay(notify(&order_id), form(body)).await.unwrap();
        assert_eq!(reply.body, "success");
        assert_eq!(reply.content_type, "text/plain; charset=utf-8");

        let paid = fx.orders.get(&order_id).await.unwrap().unwrap();
        assert_eq!(paid.state, OrderState::Paid);
        assert_eq!(paid.trade_id.as_deref(), Some("2024A1"));

        let again = fx.service.notify_pay(notify(&order_id), form(body)).await.unwrap();
        assert_eq!(again, reply);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fx.hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_notify_fires_hook_once() {
        let server = MockServer::start().await;
        let fx = Arc::new(fixture(&server.uri()));
        let order_id = pending_normal_order(&fx, &server).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            let order_id = order_id.clone();
            handles.push(tokio::spawn(async move {
                fx.service
                    .notify_pay(notify(&order_id), form("trade_status=TRADE_SUCCESS&trade_no=X"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().body, "success");
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fx.hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notify_failure_is_not_terminal() {
        let server = MockServer::start().await;
        let fx = fixture(&server.uri());
        let order_id = pending_normal_order(&fx, &server).await;

        let reply = fx
            .service
            .notify_pay(notify(&order_id), form("trade_status=TRADE_CLOSED"))
            .await
            .unwrap();
        assert_eq!(reply.body, "success");
        assert_eq!(fx.orders.get(&order_id).await.unwrap().unwrap().state, OrderState::Pending);
    }

    #[tokio::test]
    async fn test_notify_errors() {
        let server = MockServer::start().await;
        let fx = fixture(&server.uri());
        let order_id = pending_normal_order(&fx, &server).await;

        let err = fx.service.notify_pay(notify(&order_id), form("status=1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotifyEval(_)));

        let err = fx.service.notify_pay(notify("unknown"), form("")).await.unwrap_err();
        assert!(matches!(err, GatewayError::OrderNotFound(_)));

        let mut wrong_business = notify(&order_id);
        wrong_business.business_id1 = "user-2".to_string();
        let err = fx.service.notify_pay(wrong_business, form("")).await.unwrap_err();
        assert!(matches!(err, GatewayError::OrderNotFound(_)));

        let mut wrong_channel = notify(&order_id);
        wrong_channel.channel_id = "nope".to_string();
        let err = fx.service.notify_pay(wrong_channel, form("")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChannelNotFound(_)));

        let invalid = InboundBody {
            query: String::new(),
            body: vec![0xff, 0xfe],
        };
        let err = fx.service.notify_pay(notify(&order_id), invalid).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        assert_eq!(fx.orders.get(&order_id).await.unwrap().unwrap().state, OrderState::Pending);
    }

    #[tokio::test]
    async fn test_get_order() {
        let fx = fixture("http://127.0.0.1:9");
        let response = fx.service.req_pay(pay_request("usdt", "5", "USD")).await.unwrap();

        assert_eq!(fx.service.get_order(&response.order_id).await.unwrap().id, response.order_id);
        assert!(matches!(
            fx.service.get_order("missing").await,
            Err(GatewayError::OrderNotFound(_))
        ));
    }
}
