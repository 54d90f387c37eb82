// 链上转账轮询对账
// 每个待支付的链上订单一个后台任务：轮询区块浏览器，按地址 + 金额 + 时间窗口匹配转账

use crate::error::GatewayError;
use crate::models::{ApiLog, Channel, ChannelType, LogEntry, NotifyRequest, Order, OrderState, TransferPage, TransferRecord, Transition};
use crate::services::{spawn_completion, BackupHandler, ChannelStore, CompletionHook, LogSink, OrderStore, TransferQuery, TransferSource};
use crate::utils::token_minor_units;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 订单超时取消说明
pub const EXPIRED_MESSAGE: &str = "订单超时已被取消";

/// 单个订单的轮询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// 轮询中
    Polling,
    /// 匹配到转账 (或已由回调完成支付)
    Matched,
    /// 订单超时
    TimedOut,
    /// 连续失败次数耗尽，已转交兜底处理
    ErrorAborted,
    /// 进程关闭
    Cancelled,
}

impl PollState {
    /// 由其他路径完成的订单对应的轮询结果
    fn from_finished(order: &Order) -> Self {
        match order.state {
            OrderState::Paid => PollState::Matched,
            OrderState::Expired => PollState::TimedOut,
            OrderState::Failed => PollState::ErrorAborted,
            OrderState::Pending => PollState::Polling,
        }
    }
}

/// 轮询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSettings {
    /// 每页条数
    pub page_size: u32,
    /// 两次轮询的间隔
    pub interval: Duration,
    /// 允许的连续失败次数
    pub max_failures: u32,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            interval: Duration::from_secs(1),
            max_failures: 3,
        }
    }
}

/// 某条链的转账来源与默认代币合约
#[derive(Clone)]
struct ChainSource {
    source: Arc<dyn TransferSource>,
    token_contract: String,
}

/// 一轮轮询的结果
enum Step {
    /// 继续轮询，携带下一轮的分页起点
    Continue(u32),
    /// 轮询结束
    Finished(PollState),
}

/// 链上转账轮询器
pub struct ChainWatcher {
    orders: Arc<dyn OrderStore>,
    channels: Arc<dyn ChannelStore>,
    log_sink: Arc<dyn LogSink>,
    backup: Arc<dyn BackupHandler>,
    hook: Arc<dyn CompletionHook>,
    sources: HashMap<ChannelType, ChainSource>,
    settings: WatcherSettings,
    shutdown: CancellationToken,
}

impl ChainWatcher {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        channels: Arc<dyn ChannelStore>,
        log_sink: Arc<dyn LogSink>,
        backup: Arc<dyn BackupHandler>,
        hook: Arc<dyn CompletionHook>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            orders,
            channels,
            log_sink,
            backup,
            hook,
            sources: HashMap::new(),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// 注册某种链上渠道的转账来源
    ///
    /// # Arguments
    /// * `kind` - 渠道类型 (ERC20 / TRC20)
    /// * `source` - 转账记录来源
    /// * `token_contract` - 渠道未配置合约时使用的代币合约
    pub fn with_source(
        mut self,
        kind: ChannelType,
        source: Arc<dyn TransferSource>,
        token_contract: impl Into<String>,
    ) -> Self {
        self.sources.insert(
            kind,
            ChainSource {
                source,
                token_contract: token_contract.into(),
            },
        );
        self
    }

    /// 渠道使用的代币合约 (渠道配置优先)
    pub fn token_contract(&self, kind: ChannelType, channel: &Channel) -> Result<String, GatewayError> {
        if let Some(contract) = channel.crypto.as_ref().and_then(|c| c.token_contract.clone()) {
            return Ok(contract);
        }
        self.sources
            .get(&kind)
            .map(|chain| chain.token_contract.clone())
            .ok_or_else(|| GatewayError::Configuration(format!("no transfer source configured for {}", kind.as_str())))
    }

    /// 为订单启动后台轮询任务
    pub fn watch(self: &Arc<Self>, order: Order, token_contract: String) -> JoinHandle<PollState> {
        let watcher = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move { watcher.poll(order, token_contract, cancel).await })
    }

    /// 进程启动时恢复所有未完成链上订单的轮询
    ///
    /// 已超时的订单会在第一轮检查时被标记为过期
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize, GatewayError> {
        let pending = self.orders.list_pending_crypto().await?;
        let mut resumed = 0;

        for order in pending {
            let channel = match self.channels.get(&order.channel_id).await? {
                Some(channel) => channel,
                None => {
                    log::error!("Cannot resume order {}: channel {} not found", order.id, order.channel_id);
                    continue;
                }
            };
            match self.token_contract(order.channel_type, &channel) {
                Ok(contract) => {
                    self.watch(order, contract);
                    resumed += 1;
                }
                Err(e) => log::error!("Cannot resume order {}: {}", order.id, e),
            }
        }

        if resumed > 0 {
            log::info!("Resumed polling for {} pending crypto orders", resumed);
        }
        Ok(resumed)
    }

    /// 停止所有轮询任务
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 轮询单个订单直到结束
    pub async fn poll(&self, order: Order, token_contract: String, cancel: CancellationToken) -> PollState {
        let Some(chain) = self.sources.get(&order.channel_type).cloned() else {
            log::error!("No transfer source for order {} ({})", order.id, order.channel_type.as_str());
            return self.escalate(&order, "no transfer source configured").await;
        };

        let expected = match order.expected_token_amount.as_deref().map(Decimal::from_str) {
            Some(Ok(amount)) => amount,
            _ => return self.escalate(&order, "order has no valid expected token amount").await,
        };
        let address = match order.receiving_address.clone() {
            Some(address) => address,
            None => return self.escalate(&order, "order has no receiving address").await,
        };

        log::info!("Start polling order {} on {} for {} to {}", order.id, order.channel_type.as_str(), expected, address);

        let mut start = 0;
        let mut failures = 0;

        loop {
            if cancel.is_cancelled() {
                return PollState::Cancelled;
            }

            // 超时检查优先于失败计数
            if order.cancel_time_before(Utc::now()) {
                return self.expire(&order).await;
            }

            let query = TransferQuery {
                token_contract: &token_contract,
                address: &address,
                start,
                limit: self.settings.page_size,
            };

            match self.poll_once(&order, chain.source.as_ref(), &query, expected).await {
                Ok(Step::Finished(state)) => return state,
                Ok(Step::Continue(next)) => {
                    failures = 0;
                    start = next;
                }
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "Polling order {} failed ({}/{}): {}",
                        order.id,
                        failures,
                        self.settings.max_failures,
                        e
                    );
                    if failures >= self.settings.max_failures {
                        return self.escalate(&order, &e.to_string()).await;
                    }
                    start = 0;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return PollState::Cancelled,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }

    async fn poll_once(
        &self,
        order: &Order,
        source: &dyn TransferSource,
        query: &TransferQuery<'_>,
        expected: Decimal,
    ) -> Result<Step, GatewayError> {
        // 订单可能已由回调完成
        match self.orders.get(&order.id).await? {
            Some(current) if current.is_terminal() => {
                log::info!("Order {} already {}, stop polling", order.id, current.state.as_str());
                return Ok(Step::Finished(PollState::from_finished(&current)));
            }
            Some(_) => {}
            None => return Err(GatewayError::OrderNotFound(order.id.clone())),
        }

        let page = match source.fetch_transfers(query).await {
            Ok(page) => page,
            Err(e) => {
                self.log_sink
                    .save_api(ApiLog::get(&order.id, &source.endpoint(query), e.to_string(), e.status_code()))
                    .await;
                return Err(e.into());
            }
        };

        for tx in matching_transfers(order, expected, &page) {
            // 同一笔转账只能结清一个订单
            if let Some(owner) = self.orders.find_by_trade_id(&tx.hash).await? {
                if owner.id != order.id {
                    log::warn!("Transfer {} already settled order {}, skip for {}", tx.hash, owner.id, order.id);
                    continue;
                }
            }
            let pay_time = tx.block_time().unwrap_or_else(Utc::now);
            let transition = self.orders.mark_paid(&order.id, Some(tx.hash.clone()), pay_time).await?;
            return Ok(Step::Finished(self.finish_paid(transition, tx).await));
        }

        Ok(Step::Continue(next_start(&page, order.create_time, query.start, query.limit)))
    }

    async fn finish_paid(&self, transition: Transition, tx: &TransferRecord) -> PollState {
        match transition {
            Transition::Applied(paid) => {
                log::info!("Order {} matched transfer {}", paid.id, tx.hash);
                self.log_sink
                    .save(LogEntry::info(&paid.id, format!("matched on-chain transfer {}", tx.hash)))
                    .await;
                spawn_completion(Arc::clone(&self.hook), NotifyRequest::from(&paid), paid);
                PollState::Matched
            }
            Transition::AlreadyTerminal(current) => PollState::from_finished(&current),
        }
    }

    async fn expire(&self, order: &Order) -> PollState {
        match self.orders.mark_expired(&order.id, EXPIRED_MESSAGE).await {
            Ok(Transition::Applied(expired)) => {
                log::info!("Order {} expired at {}", expired.id, expired.cancel_time);
                self.log_sink.save(LogEntry::info(&expired.id, EXPIRED_MESSAGE)).await;
                PollState::TimedOut
            }
            Ok(Transition::AlreadyTerminal(current)) => PollState::from_finished(&current),
            Err(e) => {
                log::error!("Failed to expire order {}: {}", order.id, e);
                PollState::TimedOut
            }
        }
    }

    /// 交给兜底处理，整个轮询周期内最多调用一次
    async fn escalate(&self, order: &Order, reason: &str) -> PollState {
        log::error!("Polling order {} aborted: {}", order.id, reason);
        self.log_sink
            .save(LogEntry::error(&order.id, format!("polling aborted: {}", reason)))
            .await;
        self.backup.run(order).await;
        PollState::ErrorAborted
    }
}

/// 一页转账中与订单匹配的记录
///
/// 匹配条件：收款地址相同、最小单位金额相等且大于零、合约执行成功、转账时间不早于订单创建时间
pub fn matching_transfers<'a>(
    order: &'a Order,
    expected: Decimal,
    page: &'a TransferPage,
) -> impl Iterator<Item = &'a TransferRecord> + 'a {
    let address = order.receiving_address.as_deref();
    page.data.iter().filter(move |tx| {
        let Some(address) = address else {
            return false;
        };
        order.channel_type.same_address(&tx.to, address)
            && tx.is_success()
            && tx.block_time().map_or(false, |time| order.created_not_after(time))
            && match (tx.minor_amount(), token_minor_units(expected, tx.decimals)) {
                // 零金额转账 (地址投毒) 永远不算到账
                (Some(actual), Some(wanted)) => wanted > Decimal::ZERO && actual == wanted,
                _ => false,
            }
    })
}

/// 计算下一轮的分页起点
///
/// * 空页，或最新一条早于订单创建时间：回到第一页
/// * 满页且最旧一条仍不早于订单创建时间：翻到下一页
/// * 其他情况：回到第一页
pub fn next_start(page: &TransferPage, create_time: DateTime<Utc>, start: u32, limit: u32) -> u32 {
    match (page.newest_time(), page.oldest_time()) {
        (Some(newest), _) if newest < create_time => 0,
        (Some(_), Some(oldest)) if page.data.len() as u32 >= limit && oldest >= create_time => start + limit,
        _ => 0,
    }
}
