// 应用状态管理
// 包含支付服务、配置信息等全局状态

use crate::config::Config;
use crate::services::PayService;
use std::sync::Arc;

/// 应用全局状态
pub struct AppState {
    /// 支付服务
    pub pay_service: Arc<PayService>,
    /// 应用配置
    pub config: Config,
}

impl AppState {
    /// 创建新的应用状态实例
    ///
    /// # Arguments
    /// * `pay_service` - 支付服务
    /// * `config` - 应用配置
    pub fn new(pay_service: Arc<PayService>, config: Config) -> Self {
        Self { pay_service, config }
    }

    /// 创建测试用的应用状态 (内存存储，未注册链上转账来源)
    #[cfg(test)]
    pub fn new_for_test(channels: Vec<crate::models::Channel>) -> Self {
        use crate::services::{
            ChainWatcher, FixedRateProvider, HttpChannelTransport, LoggingBackupHandler, LoggingCompletionHook,
            MemoryChannelStore, MemoryOrderStore, PayDeps, StdLogSink, WatcherSettings,
        };

        let config = Config::default();
        let channels = Arc::new(MemoryChannelStore::new(channels).expect("invalid test channels"));
        let orders = Arc::new(MemoryOrderStore::new());
        let hook = Arc::new(LoggingCompletionHook);
        let watcher = ChainWatcher::new(
            orders.clone(),
            channels.clone(),
            Arc::new(StdLogSink),
            Arc::new(LoggingBackupHandler),
            hook.clone(),
            WatcherSettings::default(),
        );

        let deps = PayDeps {
            channels,
            orders,
            rates: Arc::new(FixedRateProvider::new(None)),
            transport: Arc::new(
                HttpChannelTransport::new(std::time::Duration::from_secs(3)).expect("failed to build transport"),
            ),
            log_sink: Arc::new(StdLogSink),
            hook,
            watcher: Arc::new(watcher),
        };

        let pay_service = Arc::new(PayService::new(deps, config.server.public_base_url.clone()));
        Self::new(pay_service, config)
    }
}
