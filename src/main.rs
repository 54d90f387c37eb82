mod config;
mod error;
mod expr;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod utils;

use crate::config::Config;
use crate::middleware::{create_cors, RequestLogging};
use crate::models::ChannelType;
use crate::routes::{api_v1_routes, public_routes};
use crate::services::{
    ChainWatcher, ChannelStore, CompletionHook, ExplorerClient, FixedRateProvider, HttpChannelTransport,
    HttpCompletionHook, LogSink, LoggingBackupHandler, LoggingCompletionHook, MemoryChannelStore, MemoryOrderStore,
    OrderStore, PayDeps, PayService, PgOrderStore, StdLogSink,
};
use crate::state::AppState;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use chrono::Local;
use log::info;
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    let mut log_builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    log_builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S %:z"),
                record.level(),
                record.args()
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)) // 转换为 io::Result
        })
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // 渠道配置
    let channels: Arc<dyn ChannelStore> = Arc::new(
        MemoryChannelStore::from_file(&config.channels_file)
            .with_context(|| format!("Failed to load channels from {}", config.channels_file))?,
    );

    // 订单存储
    let orders: Arc<dyn OrderStore> = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
                .idle_timeout(Duration::from_secs(config.database.idle_timeout))
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgOrderStore::new(pool);
            store.ensure_schema().await.context("Failed to prepare orders table")?;
            info!("Using PostgreSQL order store");
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set, orders are kept in memory only");
            Arc::new(MemoryOrderStore::new())
        }
    };

    // 支付完成通知
    let hook: Arc<dyn CompletionHook> = match &config.notify.url {
        Some(url) => Arc::new(HttpCompletionHook::new(
            url.as_str(),
            config.notify.secret.as_str(),
            config.notify.max_retries,
        )?),
        None => Arc::new(LoggingCompletionHook),
    };
    let log_sink: Arc<dyn LogSink> = Arc::new(StdLogSink);

    // 链上轮询
    let explorer_timeout = Duration::from_secs(config.explorer.timeout);
    let mut watcher = ChainWatcher::new(
        orders.clone(),
        channels.clone(),
        log_sink.clone(),
        Arc::new(LoggingBackupHandler),
        hook.clone(),
        config.watcher_settings(),
    )
    .with_source(
        ChannelType::Trc20,
        Arc::new(ExplorerClient::new(config.explorer.tron_api_url.as_str(), explorer_timeout)?),
        config.explorer.tron_token_contract.as_str(),
    );
    if let Some(url) = &config.explorer.erc20_api_url {
        watcher = watcher.with_source(
            ChannelType::Erc20,
            Arc::new(ExplorerClient::new(url.as_str(), explorer_timeout)?),
            config.explorer.erc20_token_contract.as_str(),
        );
    }
    let watcher = Arc::new(watcher);

    let deps = PayDeps {
        channels,
        orders,
        rates: Arc::new(FixedRateProvider::new(config.rate.usd_cny)),
        transport: Arc::new(HttpChannelTransport::new(Duration::from_secs(config.server.channel_timeout))?),
        log_sink,
        hook,
        watcher: watcher.clone(),
    };
    let pay_service = Arc::new(PayService::new(deps, config.server.public_base_url.as_str()));

    // 恢复重启前未完成的链上订单
    watcher
        .resume_pending()
        .await
        .context("Failed to resume pending crypto orders")?;

    let bind_address = config.bind_address();
    let workers = config.server.workers;
    let cors_origins = config.server.cors_origins.clone();
    let app_state = web::Data::new(AppState::new(pay_service, config));

    info!("Starting payment gateway on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(create_cors(&cors_origins))
            .wrap(RequestLogging)
            .service(api_v1_routes())
            .service(public_routes())
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }
    server.bind(&bind_address)?.run().await?;

    watcher.shutdown();
    info!("Payment gateway stopped");
    Ok(())
}
