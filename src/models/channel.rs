// 支付渠道数据模型
// 渠道由运营人员配置：渠道类型、结算币种、出站请求模板、响应与回调解析规则

use crate::error::GatewayError;
use crate::expr::{EvalContext, Value};
use crate::utils::{flatten_json, parse_urlencoded};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 渠道类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// 普通支付网关，通过出站HTTP下单、回调通知完成
    Normal,
    /// 以太坊ERC20代币转账，轮询区块浏览器完成
    Erc20,
    /// 波场TRC20代币转账，轮询区块浏览器完成
    Trc20,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Normal => "normal",
            ChannelType::Erc20 => "erc20",
            ChannelType::Trc20 => "trc20",
        }
    }

    /// 是否为链上代币渠道 (由轮询对账完成)
    pub fn is_crypto(&self) -> bool {
        matches!(self, ChannelType::Erc20 | ChannelType::Trc20)
    }

    /// 比较两个收款地址
    ///
    /// ERC20地址为十六进制，大小写只影响校验和；TRC20地址为Base58，区分大小写
    pub fn same_address(&self, a: &str, b: &str) -> bool {
        match self {
            ChannelType::Erc20 => a.trim().eq_ignore_ascii_case(b.trim()),
            _ => a.trim() == b.trim(),
        }
    }

    /// 生成钱包可识别的支付链接 (用于二维码)
    pub fn payment_uri(&self, address: &str, token_contract: Option<&str>, amount: &str) -> String {
        match (self, token_contract) {
            (ChannelType::Erc20, Some(contract)) => {
                format!("ethereum:{}/transfer?address={}&amount={}", contract, address, amount)
            }
            (ChannelType::Erc20, None) => format!("ethereum:{}?amount={}", address, amount),
            (ChannelType::Trc20, _) => format!("tron:{}?amount={}", address, amount),
            (ChannelType::Normal, _) => address.to_string(),
        }
    }
}

impl FromStr for ChannelType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(ChannelType::Normal),
            "erc20" => Ok(ChannelType::Erc20),
            "trc20" => Ok(ChannelType::Trc20),
            _ => Err(GatewayError::UnsupportedChannelType(s.to_string())),
        }
    }
}

/// 出站请求方法
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

/// 出站请求参数的编码方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    /// 拼接到URL查询串
    Query,
    /// application/x-www-form-urlencoded
    #[default]
    Form,
    /// application/json
    Json,
}

/// 渠道响应的解析方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseContentType {
    #[default]
    Json,
    Form,
    /// 整个响应体绑定到 `body` 变量
    Text,
}

impl ResponseContentType {
    /// 把渠道响应体解析为表达式上下文
    pub fn parse(&self, body: &str) -> Result<EvalContext, String> {
        match self {
            ResponseContentType::Json => {
                let value: serde_json::Value =
                    serde_json::from_str(body).map_err(|e| format!("invalid JSON response: {}", e))?;
                Ok(flatten_json(&value))
            }
            ResponseContentType::Form => parse_urlencoded(body),
            ResponseContentType::Text => {
                let mut ctx = EvalContext::new();
                ctx.insert("body", body);
                Ok(ctx)
            }
        }
    }
}

/// 回调请求的解析方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyContentType {
    /// 表单请求体
    #[default]
    Form,
    /// JSON请求体，嵌套字段以 `.` 连接展开
    Json,
    /// URL查询串 (GET回调)
    Query,
}

impl NotifyContentType {
    /// 把回调请求解析为表达式上下文
    ///
    /// # Arguments
    /// * `query` - 原始查询串
    /// * `body` - 原始请求体
    pub fn parse(&self, query: &str, body: &[u8]) -> Result<EvalContext, String> {
        match self {
            NotifyContentType::Query => parse_urlencoded(query),
            NotifyContentType::Form => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| format!("form body is not UTF-8: {}", e))?;
                parse_urlencoded(text)
            }
            NotifyContentType::Json => {
                let value: serde_json::Value = serde_json::from_slice(body)
                    .map_err(|e| format!("invalid JSON body: {}", e))?;
                Ok(flatten_json(&value))
            }
        }
    }
}

/// 回调应答的内容类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReturnContentType {
    #[default]
    Text,
    Json,
    Html,
    Xml,
}

impl ReturnContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ReturnContentType::Text => "text/plain; charset=utf-8",
            ReturnContentType::Json => "application/json; charset=utf-8",
            ReturnContentType::Html => "text/html; charset=utf-8",
            ReturnContentType::Xml => "application/xml; charset=utf-8",
        }
    }
}

/// 命名表达式 (参数名 + 表达式)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedExpr {
    pub name: String,
    pub expr: String,
}

/// 渠道静态参数 (商户号、密钥等)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelParam {
    pub name: String,
    pub value: String,
}

/// 出站下单请求模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTemplate {
    /// 请求方法
    #[serde(default)]
    pub method: HttpMethod,
    /// 渠道下单地址
    pub url: String,
    /// 参数编码方式
    #[serde(default)]
    pub encoding: BodyEncoding,
    /// 有序的请求参数，后面的参数可以引用前面的参数
    #[serde(default)]
    pub params: Vec<NamedExpr>,
    /// 请求头，可以引用全部请求参数
    #[serde(default)]
    pub headers: Vec<NamedExpr>,
}

/// 渠道下单响应的解析规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRule {
    #[serde(default)]
    pub content_type: ResponseContentType,
    /// 下单成功判定表达式
    pub success_expr: String,
    /// 支付页面地址表达式
    #[serde(default)]
    pub pay_url_expr: Option<String>,
    /// 失败原因表达式
    #[serde(default)]
    pub message_expr: Option<String>,
}

/// 回调解析与应答规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyRule {
    #[serde(default)]
    pub content_type: NotifyContentType,
    /// 支付成功判定表达式
    pub pay_success_expr: String,
    /// 渠道交易号提取表达式
    #[serde(default)]
    pub pay_id_expr: Option<String>,
    #[serde(default)]
    pub return_content_type: ReturnContentType,
    /// 原样返回给渠道的应答内容
    #[serde(default)]
    pub return_content: String,
}

/// 链上收款配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CryptoConfig {
    /// 收款地址
    pub receiving_address: String,
    /// 代币合约地址 (未配置时使用全局配置)
    #[serde(default)]
    pub token_contract: Option<String>,
}

fn default_order_timeout() -> i64 {
    30
}

/// 支付渠道
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// 渠道ID
    pub id: String,
    /// 渠道名称
    pub name: String,
    /// 渠道类型 (normal / erc20 / trc20)
    #[serde(rename = "type")]
    pub channel_type: String,
    /// 结算币种
    pub currency: String,
    /// 是否保留两位小数 (否则截断为整数)
    #[serde(default)]
    pub keep_decimal: bool,
    /// 默认商品名称
    #[serde(default)]
    pub product_name: String,
    /// 最小金额 (请求币种)
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    /// 最大金额 (请求币种)
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    /// 订单超时时间 (分钟)
    #[serde(default = "default_order_timeout")]
    pub order_timeout_minutes: i64,
    #[serde(default)]
    pub request: Option<RequestTemplate>,
    #[serde(default)]
    pub response: Option<ResponseRule>,
    #[serde(default)]
    pub notify: Option<NotifyRule>,
    #[serde(default)]
    pub crypto: Option<CryptoConfig>,
    #[serde(default)]
    pub static_params: Vec<ChannelParam>,
}

impl Channel {
    /// 解析渠道类型
    pub fn kind(&self) -> Result<ChannelType, GatewayError> {
        self.channel_type.parse()
    }

    /// 渠道层参数：渠道属性 + 静态参数
    pub fn to_context(&self) -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.insert("channel_id", &self.id);
        ctx.insert("channel_name", &self.name);
        ctx.insert("channel_currency", &self.currency);
        ctx.insert("product_name", &self.product_name);
        for param in &self.static_params {
            ctx.insert(param.name.clone(), Value::from(&param.value));
        }
        ctx
    }

    pub fn request_template(&self) -> Result<&RequestTemplate, GatewayError> {
        self.request
            .as_ref()
            .ok_or_else(|| GatewayError::Configuration(format!("channel {} has no request template", self.id)))
    }

    pub fn response_rule(&self) -> Result<&ResponseRule, GatewayError> {
        self.response
            .as_ref()
            .ok_or_else(|| GatewayError::Configuration(format!("channel {} has no response rule", self.id)))
    }

    pub fn notify_rule(&self) -> Result<&NotifyRule, GatewayError> {
        self.notify
            .as_ref()
            .ok_or_else(|| GatewayError::Configuration(format!("channel {} has no notify rule", self.id)))
    }

    pub fn crypto_config(&self) -> Result<&CryptoConfig, GatewayError> {
        self.crypto
            .as_ref()
            .ok_or_else(|| GatewayError::Configuration(format!("channel {} has no receiving address", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_parse() {
        assert_eq!("TRC20".parse::<ChannelType>().unwrap(), ChannelType::Trc20);
        assert_eq!("normal".parse::<ChannelType>().unwrap(), ChannelType::Normal);
        assert!(matches!(
            "paypal".parse::<ChannelType>(),
            Err(GatewayError::UnsupportedChannelType(_))
        ));
    }

    #[test]
    fn test_same_address() {
        let erc = ChannelType::Erc20;
        assert!(erc.same_address(
            "0x742d35Cc6634C0532925a3b8D4C9db96DfbBb8b2",
            "0x742d35cc6634c0532925a3b8d4c9db96dfbbb8b2"
        ));
        let trc = ChannelType::Trc20;
        assert!(!trc.same_address("TU8fjcJFpgGd2q9roMBmv5c9wo7q2Pwt2d", "tu8fjcjfpggd2q9rombmv5c9wo7q2pwt2d"));
    }

    #[test]
    fn test_channel_deserialize() {
        let json = r#"{
            "id": "alipay-h5",
            "name": "Alipay H5",
            "type": "normal",
            "currency": "CNY",
            "keep_decimal": true,
            "request": {
                "method": "POST",
                "url": "https://pay.example.com/order",
                "encoding": "json",
                "params": [{"name": "out_trade_no", "expr": "order_id"}]
            },
            "notify": {
                "content_type": "form",
                "pay_success_expr": "trade_status == 'TRADE_SUCCESS'",
                "return_content": "success"
            },
            "static_params": [{"name": "mch_id", "value": "1001"}]
        }"#;
        let channel: Channel = serde_json::from_str(json).unwrap();
        assert_eq!(channel.kind().unwrap(), ChannelType::Normal);
        assert_eq!(channel.order_timeout_minutes, 30);
        assert_eq!(channel.request_template().unwrap().encoding, BodyEncoding::Json);
        assert_eq!(channel.notify_rule().unwrap().return_content_type, ReturnContentType::Text);
        assert!(channel.response_rule().is_err());

        let ctx = channel.to_context();
        assert_eq!(ctx.get("mch_id"), Some(&Value::from("1001")));
        assert_eq!(ctx.get("channel_currency"), Some(&Value::from("CNY")));
    }

    #[test]
    fn test_notify_content_type_parse() {
        let ctx = NotifyContentType::Form
            .parse("", b"trade_status=TRADE_SUCCESS&out_trade_no=A%201")
            .unwrap();
        assert_eq!(ctx.get("out_trade_no"), Some(&Value::from("A 1")));

        let ctx = NotifyContentType::Json
            .parse("", br#"{"data":{"status":"paid","amount":100}}"#)
            .unwrap();
        assert_eq!(ctx.get("data.status"), Some(&Value::from("paid")));

        let ctx = NotifyContentType::Query.parse("sign=abc", b"ignored").unwrap();
        assert_eq!(ctx.get("sign"), Some(&Value::from("abc")));

        assert!(NotifyContentType::Json.parse("", b"not json").is_err());
    }

    #[test]
    fn test_payment_uri() {
        let uri = ChannelType::Trc20.payment_uri("TAddr", None, "5.00");
        assert_eq!(uri, "tron:TAddr?amount=5.00");
    }
}
