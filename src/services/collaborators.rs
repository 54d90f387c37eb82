// 外部协作者接口
// 汇率、业务日志、人工兜底处理、支付完成回调

use crate::error::GatewayError;
use crate::models::{ApiLog, LogEntry, LogLevel, NotifyRequest, Order};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// 汇率提供者
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// 获取美元汇率 (1 USD 兑换的人民币)
    ///
    /// # Arguments
    /// * `correlation_id` - 关联的订单号，用于日志追踪
    async fn get_usd_rate(&self, correlation_id: &str) -> Result<Decimal, GatewayError>;
}

/// 固定汇率 (来自配置)
#[derive(Debug, Clone)]
pub struct FixedRateProvider {
    usd_cny: Option<Decimal>,
}

impl FixedRateProvider {
    pub fn new(usd_cny: Option<Decimal>) -> Self {
        Self { usd_cny }
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn get_usd_rate(&self, correlation_id: &str) -> Result<Decimal, GatewayError> {
        match self.usd_cny {
            Some(rate) if rate > Decimal::ZERO => Ok(rate),
            _ => Err(GatewayError::RateUnavailable(format!(
                "no USD rate configured (order {})",
                correlation_id
            ))),
        }
    }
}

/// 业务日志接收者
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn save(&self, entry: LogEntry);

    async fn save_api(&self, api_log: ApiLog);
}

/// 把业务日志转发到 `log`
#[derive(Debug, Default, Clone)]
pub struct StdLogSink;

#[async_trait]
impl LogSink for StdLogSink {
    async fn save(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => log::info!("[order {}] {}", entry.order_id, entry.message),
            LogLevel::Warn => log::warn!("[order {}] {}", entry.order_id, entry.message),
            LogLevel::Error => log::error!("[order {}] {}", entry.order_id, entry.message),
        }
    }

    async fn save_api(&self, api_log: ApiLog) {
        log::warn!(
            "[order {}] {} {} -> {} {}",
            api_log.order_id,
            api_log.method,
            api_log.url,
            api_log.status_code,
            api_log.response
        );
    }
}

/// 兜底处理：自动对账无法继续时把订单交给其他流程
#[async_trait]
pub trait BackupHandler: Send + Sync {
    async fn run(&self, order: &Order);
}

/// 只记录错误日志的兜底处理
#[derive(Debug, Default, Clone)]
pub struct LoggingBackupHandler;

#[async_trait]
impl BackupHandler for LoggingBackupHandler {
    async fn run(&self, order: &Order) {
        log::error!(
            "Order {} handed off for manual reconciliation (address {}, amount {})",
            order.id,
            order.receiving_address.as_deref().unwrap_or("-"),
            order.expected_token_amount.as_deref().unwrap_or("-")
        );
    }
}

/// 支付完成回调，每个订单最多触发一次
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_paid(&self, notify: &NotifyRequest, order: &Order) -> anyhow::Result<()>;
}

/// 只记录日志的完成回调
#[derive(Debug, Default, Clone)]
pub struct LoggingCompletionHook;

#[async_trait]
impl CompletionHook for LoggingCompletionHook {
    async fn on_paid(&self, notify: &NotifyRequest, order: &Order) -> anyhow::Result<()> {
        log::info!(
            "Order {} paid on channel {} (trade {})",
            order.id,
            notify.channel_id,
            order.trade_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

/// 在后台触发支付完成回调，不阻塞HTTP应答或轮询
pub fn spawn_completion(hook: Arc<dyn CompletionHook>, notify: NotifyRequest, order: Order) {
    tokio::spawn(async move {
        if let Err(e) = hook.on_paid(&notify, &order).await {
            log::error!("Completion hook failed for order {}: {:#}", order.id, e);
        }
    });
}
