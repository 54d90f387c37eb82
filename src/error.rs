// 网关错误定义
// 请求期错误同步返回给调用方，对账期错误由轮询任务按失败预算处理

use crate::expr::EvalError;
use crate::models::ApiResponse;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// 请求参数不合法，不重试
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// 渠道模板表达式错误 (配置缺陷)
    #[error("channel template evaluation failed: {0}")]
    Eval(#[source] EvalError),

    /// 回调判定表达式错误，回调请求失败以便渠道重发
    #[error("notify evaluation failed: {0}")]
    NotifyEval(#[source] EvalError),

    #[error("exchange rate unavailable: {0}")]
    RateUnavailable(String),

    /// 访问渠道或区块浏览器的网络错误
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported channel type: {0}")]
    UnsupportedChannelType(String),

    /// 渠道拒绝下单
    #[error("channel rejected the order: {0}")]
    ChannelRejected(String),

    /// 渠道配置不完整
    #[error("channel configuration error: {0}")]
    Configuration(String),

    /// 多次生成的订单号均已存在
    #[error("failed to allocate a unique order id")]
    OrderIdExhausted,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::ChannelNotFound(_) | GatewayError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Eval(_)
            | GatewayError::NotifyEval(_)
            | GatewayError::UnsupportedChannelType(_)
            | GatewayError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Transport(_) | GatewayError::ChannelRejected(_) => StatusCode::BAD_GATEWAY,
            GatewayError::RateUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::OrderIdExhausted | GatewayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(ApiResponse::error(status.as_u16() as i32, self.to_string()))
    }
}
