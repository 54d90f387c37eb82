// 渠道出站请求
// 按渠道模板的请求方法和编码方式发送已计算好的参数

use crate::error::GatewayError;
use crate::models::{BodyEncoding, HttpMethod};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

/// 已计算好参数的出站请求
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub encoding: BodyEncoding,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// 渠道响应
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelResponse {
    pub status: u16,
    pub body: String,
}

/// 渠道出站请求接口
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// 发送请求，非2xx响应视为传输错误
    async fn send(&self, request: &OutboundRequest) -> Result<ChannelResponse, GatewayError>;
}

/// 基于reqwest的出站请求
#[derive(Clone)]
pub struct HttpChannelTransport {
    client: Client,
}

impl HttpChannelTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Unipay-Gateway/1.0")
            .build()?;
        Ok(Self { client })
    }

    fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, GatewayError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::Configuration(format!("invalid header name `{}`: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::Configuration(format!("invalid value for header `{}`: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    fn build(&self, request: &OutboundRequest) -> Result<RequestBuilder, GatewayError> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        let builder = builder.headers(Self::build_headers(&request.headers)?);

        // GET请求没有请求体，参数一律放在查询串中
        let builder = match (request.method, request.encoding) {
            (HttpMethod::Get, _) | (_, BodyEncoding::Query) => builder.query(&request.params),
            (HttpMethod::Post, BodyEncoding::Form) => builder.form(&request.params),
            (HttpMethod::Post, BodyEncoding::Json) => {
                let body: serde_json::Map<String, serde_json::Value> = request
                    .params
                    .iter()
                    .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
                    .collect();
                builder.json(&body)
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl ChannelTransport for HttpChannelTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<ChannelResponse, GatewayError> {
        let response = self.build(request)?.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Transport(format!(
                "channel responded with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(ChannelResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_json, body_string, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn request(server: &MockServer, method: HttpMethod, encoding: BodyEncoding) -> OutboundRequest {
        OutboundRequest {
            method,
            url: format!("{}/order", server.uri()),
            encoding,
            params: vec![
                ("out_trade_no".to_string(), "ABC".to_string()),
                ("total".to_string(), "12.50".to_string()),
            ],
            headers: vec![("X-Sign".to_string(), "deadbeef".to_string())],
        }
    }

    fn transport() -> HttpChannelTransport {
        HttpChannelTransport::new(Duration::from_secs(3)).unwrap()
    }

    #[tokio::test]
    async fn test_post_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header("X-Sign", "deadbeef"))
            .and(body_string("out_trade_no=ABC&total=12.50"))
            .respond_with(ResponseTemplate::new(200).set_body_string("code=0"))
            .mount(&server)
            .await;

        let response = transport()
            .send(&request(&server, HttpMethod::Post, BodyEncoding::Form))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "code=0");
    }

    #[tokio::test]
    async fn test_post_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(body_json(serde_json::json!({"out_trade_no": "ABC", "total": "12.50"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0})))
            .mount(&server)
            .await;

        let response = transport()
            .send(&request(&server, HttpMethod::Post, BodyEncoding::Json))
            .await
            .unwrap();
        assert!(response.body.contains("\"code\""));
    }

    #[tokio::test]
    async fn test_get_query_and_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/order"))
            .and(query_param("out_trade_no", "ABC"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let err = transport()
            .send(&request(&server, HttpMethod::Get, BodyEncoding::Form))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_invalid_header_is_configuration_error() {
        let server = MockServer::start().await;
        let mut req = request(&server, HttpMethod::Post, BodyEncoding::Form);
        req.headers = vec![("bad header".to_string(), "x".to_string())];

        let err = transport().send(&req).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
