// 渠道配置存储
// 渠道在启动时从JSON文件加载，运行期间只读

use crate::error::GatewayError;
use crate::models::{Channel, ChannelType};
use crate::utils::normalize_receiving_address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// 渠道查询接口
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Channel>, GatewayError>;
}

/// 内存渠道存储
#[derive(Debug, Default)]
pub struct MemoryChannelStore {
    channels: HashMap<String, Channel>,
}

impl MemoryChannelStore {
    /// 从渠道列表创建，校验渠道类型并规范化收款地址
    pub fn new(channels: Vec<Channel>) -> Result<Self> {
        let mut map = HashMap::with_capacity(channels.len());
        for mut channel in channels {
            let kind = channel
                .kind()
                .with_context(|| format!("Channel {} has an invalid type", channel.id))?;

            if kind.is_crypto() {
                let crypto = channel
                    .crypto
                    .as_mut()
                    .with_context(|| format!("Channel {} is missing the crypto section", channel.id))?;
                crypto.receiving_address = normalize_receiving_address(kind, &crypto.receiving_address)
                    .with_context(|| format!("Channel {} has an invalid receiving address", channel.id))?;
            } else if kind == ChannelType::Normal && (channel.request.is_none() || channel.response.is_none()) {
                log::warn!("Channel {} has no request template or response rule", channel.id);
            }

            if map.insert(channel.id.clone(), channel).is_some() {
                anyhow::bail!("Duplicate channel id in configuration");
            }
        }
        Ok(Self { channels: map })
    }

    /// 从JSON文件加载渠道列表
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read channels file {}", path.display()))?;
        let channels: Vec<Channel> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse channels file {}", path.display()))?;

        let store = Self::new(channels)?;
        log::info!("Loaded {} payment channels from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn get(&self, id: &str) -> Result<Option<Channel>, GatewayError> {
        Ok(self.channels.get(id).cloned())
    }
}
