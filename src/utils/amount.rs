// 金额换算工具
// 汇率换算、保留小数策略、代币最小单位换算

use crate::error::GatewayError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// 支持互相换算的币种
pub const SUPPORTED_CURRENCIES: [&str; 2] = ["CNY", "USD"];

/// 结算金额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledAmount {
    /// 元 (保留两位小数时固定两位，否则为整数)
    pub amount_yuan: Decimal,
    /// 分
    pub amount_fen: i64,
}

pub fn is_supported_currency(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&currency)
}

/// 下单币种与渠道币种不同时需要汇率
pub fn needs_conversion(amount_currency: &str, channel_currency: &str) -> bool {
    !amount_currency.eq_ignore_ascii_case(channel_currency)
}

/// 把下单金额换算为渠道币种
///
/// # Arguments
/// * `amount` - 下单金额
/// * `from` - 下单币种
/// * `to` - 渠道币种
/// * `usd_rate` - 美元汇率 (1 USD = usd_rate CNY)
pub fn convert_currency(amount: Decimal, from: &str, to: &str, usd_rate: Decimal) -> Result<Decimal, GatewayError> {
    if !needs_conversion(from, to) {
        return Ok(amount);
    }
    if usd_rate <= Decimal::ZERO {
        return Err(GatewayError::RateUnavailable(format!("invalid USD rate {}", usd_rate)));
    }
    let overflow = || GatewayError::Validation(format!("amount {} overflows after conversion", amount));
    match (from.to_ascii_uppercase().as_str(), to.to_ascii_uppercase().as_str()) {
        ("USD", "CNY") => amount.checked_mul(usd_rate).ok_or_else(overflow),
        ("CNY", "USD") => amount.checked_div(usd_rate).ok_or_else(overflow),
        (from, to) => Err(GatewayError::Validation(format!(
            "cannot convert {} to {}",
            from, to
        ))),
    }
}

/// 按渠道的保留小数策略计算结算金额
///
/// * 保留小数：四舍五入到两位，分 = 元 × 100
/// * 不保留小数：截断为整数，分 = 整数 × 100
pub fn settle_amount(amount: Decimal, keep_decimal: bool) -> Result<SettledAmount, GatewayError> {
    let mut amount_yuan = if keep_decimal {
        amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        amount.trunc()
    };
    amount_yuan.rescale(if keep_decimal { 2 } else { 0 });

    let amount_fen = (amount_yuan * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| GatewayError::Validation(format!("amount {} is too large", amount)))?;

    Ok(SettledAmount {
        amount_yuan,
        amount_fen,
    })
}

/// 代币数量换算为最小单位整数 (截断)
///
/// # Arguments
/// * `amount` - 代币数量
/// * `decimals` - 代币精度
///
/// # Returns
/// * 最小单位数量，溢出时返回 None
pub fn token_minor_units(amount: Decimal, decimals: u32) -> Option<Decimal> {
    let mut scaled = amount;
    for _ in 0..decimals {
        scaled = scaled.checked_mul(Decimal::TEN)?;
    }
    Some(scaled.trunc())
}
