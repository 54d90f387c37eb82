// 数据验证工具函数
// 提供下单请求校验、收款地址格式检查等功能

use crate::error::GatewayError;
use crate::models::{Channel, ChannelType, PayRequest};
use crate::utils::amount::{is_supported_currency, needs_conversion};
use ethers::types::Address;
use ethers::utils::to_checksum;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Base58字母表 (TRON地址)
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// 校验并规范化ERC20收款地址
///
/// # Arguments
/// * `address` - 以太坊地址字符串
///
/// # Returns
/// * EIP-55校验和格式的地址
pub fn normalize_erc20_address(address: &str) -> Result<String, GatewayError> {
    let trimmed = address.trim();
    if trimmed.len() != 42 || !trimmed.starts_with("0x") {
        return Err(GatewayError::Configuration(format!(
            "invalid ERC20 address `{}`",
            address
        )));
    }
    let parsed = Address::from_str(trimmed)
        .map_err(|e| GatewayError::Configuration(format!("invalid ERC20 address `{}`: {}", address, e)))?;
    Ok(to_checksum(&parsed, None))
}

/// 验证TRC20地址格式
///
/// TRON主网地址以 `T` 开头，共34个Base58字符
pub fn validate_trc20_address(address: &str) -> bool {
    address.len() == 34
        && address.starts_with('T')
        && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// 校验渠道收款地址，返回规范化后的地址
pub fn normalize_receiving_address(kind: ChannelType, address: &str) -> Result<String, GatewayError> {
    match kind {
        ChannelType::Erc20 => normalize_erc20_address(address),
        ChannelType::Trc20 if validate_trc20_address(address.trim()) => Ok(address.trim().to_string()),
        ChannelType::Trc20 => Err(GatewayError::Configuration(format!(
            "invalid TRC20 address `{}`",
            address
        ))),
        ChannelType::Normal => Ok(address.to_string()),
    }
}

/// 验证URL格式
pub fn validate_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !url.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// 校验下单请求，返回解析后的下单金额
///
/// 所有违反的约束一次性列出
pub fn validate_pay_request(request: &PayRequest, channel: &Channel) -> Result<Decimal, GatewayError> {
    let mut validator = InputValidator::new();

    validator.validate_required("channel_id", &request.channel_id);
    validator.validate_length("subject", &request.subject, 0, 128);
    validator.validate_length("business_id1", &request.business_id1, 0, 64);
    validator.validate_length("business_id2", &request.business_id2, 0, 64);
    validator.validate_length("business_id3", &request.business_id3, 0, 64);
    validator.validate_url_field("return_url", &request.return_url);

    let currency = request.currency.trim().to_ascii_uppercase();
    if currency.is_empty() {
        validator.add_error("currency", "This field is required");
    } else if needs_conversion(&currency, &channel.currency)
        && !(is_supported_currency(&currency) && is_supported_currency(&channel.currency.to_ascii_uppercase()))
    {
        validator.add_error(
            "currency",
            &format!("Cannot settle {} on a {} channel", currency, channel.currency),
        );
    }

    let amount = validator.validate_amount_field("amount", &request.amount);
    if let Some(amount) = amount {
        if let Some(min) = channel.min_amount {
            if amount < min {
                validator.add_error("amount", &format!("Must be at least {}", min));
            }
        }
        if let Some(max) = channel.max_amount {
            if amount > max {
                validator.add_error("amount", &format!("Must be at most {}", max));
            }
        }
    }

    validator.into_result()?;
    amount.ok_or_else(|| GatewayError::Validation("amount: Invalid amount".to_string()))
}

/// 通用输入验证器
pub struct InputValidator {
    errors: BTreeMap<String, Vec<String>>,
}

impl InputValidator {
    /// 创建新的验证器
    pub fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    /// 添加字段验证错误
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// 验证必填字段
    pub fn validate_required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add_error(field, "This field is required");
        }
    }

    /// 验证字符串长度 (按字符计)
    pub fn validate_length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min {
            self.add_error(field, &format!("Must be at least {} characters", min));
        }
        if len > max {
            self.add_error(field, &format!("Must be at most {} characters", max));
        }
    }

    /// 验证URL格式 (允许为空)
    pub fn validate_url_field(&mut self, field: &str, url: &str) {
        if !url.is_empty() && !validate_url(url) {
            self.add_error(field, "Invalid URL format");
        }
    }

    /// 验证金额：可解析的正数
    pub fn validate_amount_field(&mut self, field: &str, value: &str) -> Option<Decimal> {
        match Decimal::from_str(value.trim()) {
            Ok(amount) if amount > Decimal::ZERO => Some(amount),
            Ok(_) => {
                self.add_error(field, "Must be positive");
                None
            }
            Err(_) => {
                self.add_error(field, "Invalid amount");
                None
            }
        }
    }

    /// 检查是否有验证错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 获取验证错误
    pub fn get_errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// 转换为错误结果
    pub fn into_result(self) -> Result<(), GatewayError> {
        if self.has_errors() {
            let error_msg = self
                .errors
                .iter()
                .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
                .collect::<Vec<_>>()
                .join("; ");

            return Err(GatewayError::Validation(error_msg));
        }

        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}
