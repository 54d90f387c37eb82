// 支付订单数据模型
// 定义订单状态机以及下单请求/响应结构

use crate::error::GatewayError;
use crate::expr::EvalContext;
use crate::models::ChannelType;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// 订单状态
///
/// 只允许 Pending → Paid / Expired / Failed，终态不可再变更
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// 待支付
    #[default]
    Pending,
    /// 已支付
    Paid,
    /// 已过期
    Expired,
    /// 下单失败
    Failed,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Paid => "paid",
            OrderState::Expired => "expired",
            OrderState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Pending)
    }
}

impl FromStr for OrderState {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderState::Pending),
            "paid" => Ok(OrderState::Paid),
            "expired" => Ok(OrderState::Expired),
            "failed" => Ok(OrderState::Failed),
            other => Err(GatewayError::Storage(anyhow::anyhow!("unknown order state `{}`", other))),
        }
    }
}

/// 支付订单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// 订单号 (随机生成)
    pub id: String,
    /// 渠道ID
    pub channel_id: String,
    /// 下单时的渠道类型
    pub channel_type: ChannelType,
    /// 业务关联ID
    pub business_id1: String,
    pub business_id2: String,
    pub business_id3: String,
    /// 商品名称
    pub subject: String,
    /// 结算币种 (渠道币种)
    pub currency: String,
    /// 结算金额 (元)
    pub amount_yuan: Decimal,
    /// 结算金额 (分)
    pub amount_fen: i64,
    /// 订单状态
    pub state: OrderState,
    /// 渠道交易号 / 链上交易哈希
    pub trade_id: Option<String>,
    /// 状态说明
    pub message: Option<String>,
    /// 收款地址 (链上订单)
    pub receiving_address: Option<String>,
    /// 应收代币数量 (链上订单，十进制字符串)
    pub expected_token_amount: Option<String>,
    /// 创建时间
    pub create_time: DateTime<Utc>,
    /// 支付时间
    pub pay_time: Option<DateTime<Utc>>,
    /// 取消 (过期) 时间
    pub cancel_time: DateTime<Utc>,
    /// 更新时间
    pub update_time: DateTime<Utc>,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 订单截止时间是否已过
    pub fn cancel_time_before(&self, now: DateTime<Utc>) -> bool {
        self.cancel_time <= now
    }

    /// 给定时间是否不早于订单创建时间
    pub fn created_not_after(&self, time: DateTime<Utc>) -> bool {
        self.create_time <= time
    }

    /// 是否匹配回调中携带的业务ID (空值不参与比较)
    pub fn matches_business_ids(&self, ids: [&str; 3]) -> bool {
        let own = [&self.business_id1, &self.business_id2, &self.business_id3];
        own.iter()
            .zip(ids.iter())
            .all(|(own, given)| given.is_empty() || own.as_str() == *given)
    }
}

/// 新订单的构造参数
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub business_ids: [String; 3],
    pub subject: String,
    pub currency: String,
    pub amount_yuan: Decimal,
    pub amount_fen: i64,
    pub receiving_address: Option<String>,
    pub expected_token_amount: Option<String>,
    pub timeout: Duration,
}

impl NewOrder {
    pub fn into_order(self, now: DateTime<Utc>) -> Order {
        let [business_id1, business_id2, business_id3] = self.business_ids;
        Order {
            id: self.id,
            channel_id: self.channel_id,
            channel_type: self.channel_type,
            business_id1,
            business_id2,
            business_id3,
            subject: self.subject,
            currency: self.currency,
            amount_yuan: self.amount_yuan,
            amount_fen: self.amount_fen,
            state: OrderState::Pending,
            trade_id: None,
            message: None,
            receiving_address: self.receiving_address,
            expected_token_amount: self.expected_token_amount,
            create_time: now,
            pay_time: None,
            cancel_time: now + self.timeout,
            update_time: now,
        }
    }
}

/// 状态迁移结果
///
/// 对终态订单的迁移请求不是错误，而是返回 `AlreadyTerminal`
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 本次调用完成了迁移
    Applied(Order),
    /// 订单已是终态，未做任何修改
    AlreadyTerminal(Order),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn order(&self) -> &Order {
        match self {
            Transition::Applied(order) | Transition::AlreadyTerminal(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Transition::Applied(order) | Transition::AlreadyTerminal(order) => order,
        }
    }
}

/// 下单请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayRequest {
    /// 渠道ID
    pub channel_id: String,
    /// 下单金额 (十进制字符串)
    pub amount: String,
    /// 下单币种
    pub currency: String,
    /// 商品名称 (为空时使用渠道默认名称)
    #[serde(default)]
    pub subject: String,
    /// 业务关联ID
    #[serde(default)]
    pub business_id1: String,
    #[serde(default)]
    pub business_id2: String,
    #[serde(default)]
    pub business_id3: String,
    /// 支付完成后的跳转地址
    #[serde(default)]
    pub return_url: String,
    /// 付款人IP
    #[serde(default)]
    pub client_ip: String,
    /// 透传给渠道模板的附加参数
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl PayRequest {
    /// 请求层参数
    pub fn to_context(&self) -> EvalContext {
        let mut ctx: EvalContext = self.extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        ctx.insert("subject", &self.subject);
        ctx.insert("amount", &self.amount);
        ctx.insert("amount_currency", &self.currency);
        ctx.insert("business_id1", &self.business_id1);
        ctx.insert("business_id2", &self.business_id2);
        ctx.insert("business_id3", &self.business_id3);
        ctx.insert("return_url", &self.return_url);
        ctx.insert("client_ip", &self.client_ip);
        ctx
    }

    pub fn business_ids(&self) -> [String; 3] {
        [
            self.business_id1.clone(),
            self.business_id2.clone(),
            self.business_id3.clone(),
        ]
    }
}

/// 下单响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayResponse {
    /// 订单号
    pub order_id: String,
    /// 渠道类型
    pub channel_type: ChannelType,
    /// 结算币种
    pub currency: String,
    /// 结算金额 (元)
    pub amount_yuan: Decimal,
    /// 结算金额 (分)
    pub amount_fen: i64,
    /// 支付页面地址 (普通渠道)
    pub pay_url: Option<String>,
    /// 收款地址 (链上渠道)
    pub receiving_address: Option<String>,
    /// 应付代币数量 (链上渠道)
    pub amount_due: Option<String>,
    /// 支付二维码 (Base64 PNG，链上渠道)
    pub qr_code: Option<String>,
    /// 订单过期时间
    pub expire_time: DateTime<Utc>,
}
