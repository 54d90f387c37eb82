// 支付网关数据模型定义
// 包含渠道配置、订单、回调、区块浏览器转账记录、日志等核心数据结构

mod channel;
mod logs;
mod notify;
mod order;
mod transfer;

// 重新导出核心类型
pub use channel::*;
pub use logs::*;
pub use notify::*;
pub use order::*;
pub use transfer::*;

use serde::Serialize;

/// 标准API响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 响应状态码
    pub code: i32,
    /// 响应消息
    pub message: String,
    /// 响应数据
    pub data: Option<T>,
    /// 响应时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    /// 创建错误响应
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        ApiResponse {
            code,
            message: message.into(),
            data: None,
            timestamp: chrono::Utc::now(),
        }
    }
}
