// 渠道回调数据模型

use super::Order;
use serde::{Deserialize, Serialize};

/// 回调请求标识 (来自路径与查询参数)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotifyRequest {
    /// 渠道ID
    pub channel_id: String,
    /// 订单号
    pub order_id: String,
    /// 业务关联ID
    #[serde(default)]
    pub business_id1: String,
    #[serde(default)]
    pub business_id2: String,
    #[serde(default)]
    pub business_id3: String,
}

impl NotifyRequest {
    pub fn business_ids(&self) -> [&str; 3] {
        [&self.business_id1, &self.business_id2, &self.business_id3]
    }
}

/// 轮询对账完成时按订单构造回调标识
impl From<&Order> for NotifyRequest {
    fn from(order: &Order) -> Self {
        NotifyRequest {
            channel_id: order.channel_id.clone(),
            order_id: order.id.clone(),
            business_id1: order.business_id1.clone(),
            business_id2: order.business_id2.clone(),
            business_id3: order.business_id3.clone(),
        }
    }
}

/// 回调查询参数中的业务ID
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyQuery {
    #[serde(default)]
    pub business_id1: String,
    #[serde(default)]
    pub business_id2: String,
    #[serde(default)]
    pub business_id3: String,
}

/// 原始回调内容
#[derive(Debug, Clone, Default)]
pub struct InboundBody {
    /// 原始查询串
    pub query: String,
    /// 原始请求体
    pub body: Vec<u8>,
}

/// 返回给渠道的应答
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyReply {
    pub content_type: &'static str,
    pub body: String,
}
