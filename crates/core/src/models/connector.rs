use serde::{Deserialize, Serialize};

use crate::models::Capability;
use crate::traits::CapabilityDemander;

/// 连接器配置，按类型声明执行时需要的Delegate能力
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorConfig {
    Http {
        url: String,
        #[serde(default)]
        delegate_selectors: Vec<String>,
    },
    DockerRegistry {
        registry_url: String,
        #[serde(default)]
        delegate_selectors: Vec<String>,
    },
    Kubernetes {
        /// 为空表示使用Delegate所在集群的凭据
        #[serde(default)]
        master_url: Option<String>,
        #[serde(default)]
        delegate_selectors: Vec<String>,
    },
    Git {
        repo_url: String,
        #[serde(default)]
        delegate_selectors: Vec<String>,
    },
    Custom,
}

impl ConnectorConfig {
    pub fn delegate_selectors(&self) -> &[String] {
        match self {
            ConnectorConfig::Http { delegate_selectors, .. }
            | ConnectorConfig::DockerRegistry { delegate_selectors, .. }
            | ConnectorConfig::Kubernetes { delegate_selectors, .. }
            | ConnectorConfig::Git { delegate_selectors, .. } => delegate_selectors.as_slice(),
            ConnectorConfig::Custom => &[],
        }
    }
}

impl CapabilityDemander for ConnectorConfig {
    fn fetch_required_capabilities(&self) -> Vec<Capability> {
        let mut capabilities = match self {
            ConnectorConfig::Http { url, .. } => vec![Capability::http(url.clone())],
            ConnectorConfig::DockerRegistry { registry_url, .. } => {
                vec![Capability::http(registry_url.clone())]
            }
            ConnectorConfig::Kubernetes { master_url, .. } => master_url
                .iter()
                .map(|url| Capability::http(url.clone()))
                .collect(),
            ConnectorConfig::Git { repo_url, .. } => vec![Capability::http(repo_url.clone())],
            ConnectorConfig::Custom => Vec::new(),
        };

        let selectors = self.delegate_selectors();
        if !selectors.is_empty() {
            capabilities.push(Capability::Selector {
                selectors: selectors.to_vec(),
                origin: Some("connector".to_string()),
            });
        }
        capabilities
    }
}
