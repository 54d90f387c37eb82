// 配置管理模块
// 负责加载和管理应用程序配置

use crate::services::WatcherSettings;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// 应用程序配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 区块浏览器轮询配置
    pub explorer: ExplorerConfig,
    /// 汇率配置
    pub rate: RateConfig,
    /// 业务通知配置
    pub notify: NotifyConfig,
    /// 渠道配置文件路径 (JSON数组)
    pub channels_file: String,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 工作线程数
    pub workers: Option<usize>,
    /// 对外访问地址，渠道回调地址以此为前缀
    pub public_base_url: String,
    /// 渠道出站请求超时时间 (秒)
    pub channel_timeout: u64,
    /// 允许跨域访问的源，为空时只允许本机
    pub cors_origins: Vec<String>,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接URL，未配置时使用内存存储
    pub url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小空闲连接数
    pub min_connections: u32,
    /// 连接超时时间 (秒)
    pub connect_timeout: u64,
    /// 空闲超时时间 (秒)
    pub idle_timeout: u64,
}

/// 区块浏览器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// TRC20转账查询接口
    pub tron_api_url: String,
    /// TRC20代币合约 (默认USDT)
    pub tron_token_contract: String,
    /// ERC20转账查询接口，未配置时不启用ERC20渠道
    pub erc20_api_url: Option<String>,
    /// ERC20代币合约 (默认USDT)
    pub erc20_token_contract: String,
    /// 每页条数
    pub page_size: u32,
    /// 轮询间隔 (毫秒)
    pub interval_ms: u64,
    /// 单次查询超时 (秒)
    pub timeout: u64,
    /// 连续失败多少次后放弃轮询
    pub max_failures: u32,
}

/// 汇率配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    /// 1美元兑人民币汇率
    pub usd_cny: Option<Decimal>,
}

/// 业务通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// 业务系统接收支付完成通知的地址，未配置时只记录日志
    pub url: Option<String>,
    /// 通知签名密钥
    pub secret: String,
    /// 最大重试次数
    pub max_retries: usize,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // 加载.env文件，忽略错误

        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", "8080")?,
                workers: env::var("SERVER_WORKERS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or(defaults.server.public_base_url),
                channel_timeout: parse_var("CHANNEL_TIMEOUT", "10")?,
                cors_origins: env::var("CORS_ORIGINS")
                    .map(|origins| {
                        origins
                            .split(',')
                            .map(|origin| origin.trim().to_string())
                            .filter(|origin| !origin.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections: parse_var("DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
                connect_timeout: parse_var("DB_CONNECT_TIMEOUT", "30")?,
                idle_timeout: parse_var("DB_IDLE_TIMEOUT", "600")?,
            },
            explorer: ExplorerConfig {
                tron_api_url: env::var("TRON_API_URL").unwrap_or(defaults.explorer.tron_api_url),
                tron_token_contract: env::var("TRON_TOKEN_CONTRACT")
                    .unwrap_or(defaults.explorer.tron_token_contract),
                erc20_api_url: optional_var("ERC20_API_URL"),
                erc20_token_contract: env::var("ERC20_TOKEN_CONTRACT")
                    .unwrap_or(defaults.explorer.erc20_token_contract),
                page_size: parse_var("EXPLORER_PAGE_SIZE", "50")?,
                interval_ms: parse_var("EXPLORER_INTERVAL_MS", "1000")?,
                timeout: parse_var("EXPLORER_TIMEOUT", "3")?,
                max_failures: parse_var("EXPLORER_MAX_FAILURES", "3")?,
            },
            rate: RateConfig {
                usd_cny: optional_var("USD_CNY_RATE")
                    .map(|rate| rate.parse())
                    .transpose()
                    .context("Invalid USD_CNY_RATE")?,
            },
            notify: NotifyConfig {
                url: optional_var("NOTIFY_URL"),
                secret: env::var("NOTIFY_SECRET").unwrap_or_default(),
                max_retries: parse_var("NOTIFY_MAX_RETRIES", "5")?,
            },
            channels_file: env::var("CHANNELS_FILE").unwrap_or(defaults.channels_file),
        })
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        // 验证服务器配置
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.server.public_base_url.trim().is_empty() {
            anyhow::bail!("PUBLIC_BASE_URL cannot be empty");
        }

        // 验证轮询配置
        if self.explorer.page_size == 0 {
            anyhow::bail!("Explorer page size must be positive");
        }

        if self.explorer.max_failures == 0 {
            anyhow::bail!("Explorer max failures must be positive");
        }

        if let Some(rate) = self.rate.usd_cny {
            if rate <= Decimal::ZERO {
                anyhow::bail!("USD_CNY_RATE must be positive");
            }
        }

        // 验证通知配置
        if self.notify.url.is_some() && self.notify.secret.len() < 16 {
            anyhow::bail!("NOTIFY_SECRET must be at least 16 characters when NOTIFY_URL is set");
        }

        Ok(())
    }

    /// 获取服务器绑定地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 轮询器参数
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            page_size: self.explorer.page_size,
            interval: Duration::from_millis(self.explorer.interval_ms),
            max_failures: self.explorer.max_failures,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                workers: None,
                public_base_url: "http://127.0.0.1:8080".to_string(),
                channel_timeout: 10,
                cors_origins: Vec::new(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                min_connections: 1,
                connect_timeout: 30,
                idle_timeout: 600,
            },
            explorer: ExplorerConfig {
                tron_api_url: "https://apilist.tronscanapi.com/api/transfer/trc20".to_string(),
                tron_token_contract: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
                erc20_api_url: None,
                erc20_token_contract: "0xdAC17F958D2ee523a2206206994597C13D831ec7".to_string(),
                page_size: 50,
                interval_ms: 1000,
                timeout: 3,
                max_failures: 3,
            },
            rate: RateConfig { usd_cny: None },
            notify: NotifyConfig {
                url: None,
                secret: String::new(),
                max_retries: 5,
            },
            channels_file: "channels.json".to_string(),
        }
    }
}
