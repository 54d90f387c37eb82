// 业务日志与接口调用日志模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 订单相关的业务日志
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: Uuid,
    pub order_id: String,
    pub level: LogLevel,
    pub message: String,
    pub create_time: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(order_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            level,
            message: message.into(),
            create_time: Utc::now(),
        }
    }

    pub fn error(order_id: &str, message: impl Into<String>) -> Self {
        Self::new(order_id, LogLevel::Error, message)
    }

    pub fn info(order_id: &str, message: impl Into<String>) -> Self {
        Self::new(order_id, LogLevel::Info, message)
    }
}

/// 出站接口调用日志
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiLog {
    pub id: Uuid,
    pub order_id: String,
    pub method: String,
    pub url: String,
    /// 响应内容或错误信息
    pub response: String,
    /// HTTP状态码 (未收到响应时为0)
    pub status_code: u16,
    pub create_time: DateTime<Utc>,
}

impl ApiLog {
    pub fn get(order_id: &str, url: &str, response: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            response: response.into(),
            status_code,
            create_time: Utc::now(),
        }
    }
}
