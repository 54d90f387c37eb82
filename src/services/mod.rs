// 服务层模块
// 包含下单分发、回调对账、链上轮询以及它们依赖的存储和外部协作者

pub mod chain_watcher;
pub mod channel_store;
pub mod channel_transport;
pub mod collaborators;
pub mod explorer_service;
pub mod notifier_service;
pub mod order_store;
pub mod pay_service;

// 重新导出服务
pub use chain_watcher::{ChainWatcher, WatcherSettings};
pub use channel_store::{ChannelStore, MemoryChannelStore};
pub use channel_transport::{ChannelTransport, HttpChannelTransport, OutboundRequest};
pub use collaborators::{
    spawn_completion, BackupHandler, CompletionHook, FixedRateProvider, LogSink, LoggingBackupHandler,
    LoggingCompletionHook, RateProvider, StdLogSink,
};
pub use explorer_service::{ExplorerClient, TransferError, TransferQuery, TransferSource};
pub use notifier_service::HttpCompletionHook;
pub use order_store::{MemoryOrderStore, OrderStore, PgOrderStore};
pub use pay_service::{PayDeps, PayService};
