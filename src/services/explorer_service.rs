// 区块浏览器服务
// 查询收款地址最近的代币转账记录 (tronscan `/api/transfer/trc20` 接口格式)

use crate::error::GatewayError;
use crate::models::TransferPage;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use thiserror::Error;

/// 一次转账查询
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferQuery<'a> {
    /// 代币合约地址
    pub token_contract: &'a str,
    /// 收款地址
    pub address: &'a str,
    /// 分页起点
    pub start: u32,
    /// 每页条数
    pub limit: u32,
}

/// 查询失败的原因
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response body")]
    EmptyBody,

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransferError {
    /// 用于接口日志的HTTP状态码，未收到响应时为0
    pub fn status_code(&self) -> u16 {
        match self {
            TransferError::Request(_) => 0,
            TransferError::Status { status, .. } => *status,
            TransferError::EmptyBody | TransferError::Decode(_) => 200,
        }
    }
}

impl From<TransferError> for GatewayError {
    fn from(e: TransferError) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

/// 转账记录来源
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// 查询地址 (写入接口日志)
    fn endpoint(&self, query: &TransferQuery<'_>) -> String;

    /// 按时间倒序查询一页转账
    async fn fetch_transfers(&self, query: &TransferQuery<'_>) -> Result<TransferPage, TransferError>;
}

/// 区块浏览器HTTP客户端
#[derive(Clone)]
pub struct ExplorerClient {
    client: Client,
    api_url: String,
}

impl ExplorerClient {
    /// 创建客户端
    ///
    /// # Arguments
    /// * `api_url` - 转账查询接口地址
    /// * `timeout` - 单次请求超时
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Unipay-Gateway/1.0")
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    fn build_url(&self, query: &TransferQuery<'_>) -> Result<Url, TransferError> {
        let start = query.start.to_string();
        let limit = query.limit.to_string();
        Url::parse_with_params(
            &self.api_url,
            &[
                ("sort", "-timestamp"),
                ("direction", "2"),
                ("db_version", "1"),
                ("trc20Id", query.token_contract),
                ("address", query.address),
                ("start", start.as_str()),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| TransferError::Request(format!("invalid explorer url: {}", e)))
    }
}

#[async_trait]
impl TransferSource for ExplorerClient {
    fn endpoint(&self, query: &TransferQuery<'_>) -> String {
        self.build_url(query)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| self.api_url.clone())
    }

    async fn fetch_transfers(&self, query: &TransferQuery<'_>) -> Result<TransferPage, TransferError> {
        let url = self.build_url(query)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransferError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Err(TransferError::EmptyBody);
        }

        serde_json::from_str(&body).map_err(|e| TransferError::Decode(e.to_string()))
    }
}
