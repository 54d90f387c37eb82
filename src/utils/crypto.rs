// 加密工具函数
// 提供订单号生成、HMAC签名验证等安全功能

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 订单号长度
pub const ORDER_ID_LENGTH: usize = 20;

/// 生成随机订单号
///
/// # Arguments
/// * `length` - 订单号长度
///
/// # Returns
/// * 由大小写字母和数字组成的随机字符串
pub fn generate_order_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// 生成HMAC-SHA256签名
///
/// # Arguments
/// * `message` - 要签名的消息
/// * `secret` - 签名密钥
///
/// # Returns
/// * 十六进制格式的签名字符串
pub fn generate_hmac_signature(message: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("Invalid HMAC key")?;

    mac.update(message.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

/// 验证HMAC-SHA256签名
pub fn verify_hmac_signature(message: &str, signature: &str, secret: &str) -> Result<bool> {
    let expected_signature = generate_hmac_signature(message, secret)?;
    Ok(constant_time_eq(&expected_signature, signature))
}

/// 常量时间字符串比较
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// 为业务通知载荷生成签名，格式为 `sha256=<hex>`
pub fn sign_notify_payload(payload: &str, secret: &str) -> Result<String> {
    Ok(format!("sha256={}", generate_hmac_signature(payload, secret)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_order_id() {
        let id = generate_order_id(ORDER_ID_LENGTH);
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_order_id(ORDER_ID_LENGTH));
    }

    #[test]
    fn test_hmac_signature() {
        let message = "test message";
        let secret = "test secret";

        let signature = generate_hmac_signature(message, secret).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_hmac_signature(message, &signature, secret).unwrap());
        assert!(!verify_hmac_signature(message, "invalid_signature", secret).unwrap());
    }

    #[test]
    fn test_sign_notify_payload() {
        let payload = r#"{"order_id":"abc","state":"paid"}"#;
        let signature = sign_notify_payload(payload, "secret").unwrap();
        let hex = signature.strip_prefix("sha256=").unwrap();
        assert!(verify_hmac_signature(payload, hex, "secret").unwrap());
    }
}
