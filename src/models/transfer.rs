// 区块浏览器转账记录模型
// 字段与 tronscan `/api/transfer/trc20` 接口保持一致

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 一页转账记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransferPage {
    #[serde(default)]
    pub page_size: i64,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub data: Vec<TransferRecord>,
}

impl TransferPage {
    /// 最新一条记录的时间 (接口按时间倒序返回)
    pub fn newest_time(&self) -> Option<DateTime<Utc>> {
        self.data.first().and_then(|tx| tx.block_time())
    }

    /// 最旧一条记录的时间
    pub fn oldest_time(&self) -> Option<DateTime<Utc>> {
        self.data.last().and_then(|tx| tx.block_time())
    }
}

/// 单条代币转账记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransferRecord {
    /// 转账数量 (最小单位整数字符串)
    #[serde(default)]
    pub amount: String,
    /// 区块时间 (毫秒)
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// 交易哈希
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub confirmed: i64,
    /// 合约执行结果，成功为 `SUCCESS`
    #[serde(default)]
    pub contract_ret: String,
    /// 代币精度
    #[serde(default)]
    pub decimals: u32,
    #[serde(default)]
    pub token_name: String,
}

impl TransferRecord {
    pub fn block_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.block_timestamp).single()
    }

    pub fn is_success(&self) -> bool {
        self.contract_ret.eq_ignore_ascii_case("success")
    }

    /// 转账数量 (最小单位)
    pub fn minor_amount(&self) -> Option<Decimal> {
        Decimal::from_str(self.amount.trim()).ok()
    }
}
