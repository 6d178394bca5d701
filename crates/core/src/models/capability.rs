use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// 能力的判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapabilityEvaluationMode {
    /// 由调度端根据Delegate元数据直接判定
    Manager,
    /// 需要Delegate自己执行连通性检查后上报结果
    Agent,
}

/// 任务对执行Delegate提出的能力要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    HttpConnection {
        url: String,
    },
    SocketConnection {
        host: String,
        port: u16,
    },
    Selector {
        selectors: Vec<String>,
        #[serde(default)]
        origin: Option<String>,
    },
    SystemEnv {
        name: String,
        #[serde(default)]
        expected_value: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Capability {
    pub fn http(url: impl Into<String>) -> Self {
        Capability::HttpConnection { url: url.into() }
    }

    pub fn selector<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Capability::Selector {
            selectors: selectors.into_iter().map(Into::into).collect(),
            origin: None,
        }
    }

    pub fn evaluation_mode(&self) -> CapabilityEvaluationMode {
        match self {
            Capability::HttpConnection { .. }
            | Capability::SocketConnection { .. }
            | Capability::SystemEnv { .. } => CapabilityEvaluationMode::Agent,
            Capability::Selector { .. } | Capability::Unknown => CapabilityEvaluationMode::Manager,
        }
    }

    /// 能力的唯一描述符，用于缓存连通性检查结果。
    ///
    /// 无法解析的能力返回 `None`，调用方应将其视为不满足。
    pub fn key(&self) -> Option<String> {
        match self {
            Capability::HttpConnection { url } => {
                let parsed = Url::parse(url).ok()?;
                let host = parsed.host_str()?;
                let port = parsed.port_or_known_default()?;
                Some(format!("{}://{}:{}", parsed.scheme(), host.to_lowercase(), port))
            }
            Capability::SocketConnection { host, port } => {
                if host.trim().is_empty() || *port == 0 {
                    return None;
                }
                Some(format!("socket://{}:{}", host.to_lowercase(), port))
            }
            Capability::Selector { selectors, .. } => {
                if selectors.is_empty() || selectors.iter().any(|s| s.trim().is_empty()) {
                    return None;
                }
                let mut normalized: Vec<String> =
                    selectors.iter().map(|s| s.trim().to_lowercase()).collect();
                normalized.sort();
                normalized.dedup();
                Some(format!("selector:{}", normalized.join(",")))
            }
            Capability::SystemEnv {
                name,
                expected_value,
            } => {
                if name.trim().is_empty() {
                    return None;
                }
                Some(format!(
                    "env:{}={}",
                    name,
                    expected_value.as_deref().unwrap_or("*")
                ))
            }
            Capability::Unknown => None,
        }
    }

    /// 调度端判定的能力：选择器必须全部出现在Delegate的标签中
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        match self {
            Capability::Selector { selectors, .. } => {
                self.key().is_some()
                    && selectors.iter().all(|selector| {
                        let selector = selector.trim();
                        tags.iter().any(|tag| tag.eq_ignore_ascii_case(selector))
                    })
            }
            _ => false,
        }
    }
}

/// Delegate上报的能力检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityCheckResult {
    pub delegate_id: String,
    pub capability_key: String,
    pub validated: bool,
    pub checked_at: DateTime<Utc>,
}

impl CapabilityCheckResult {
    pub fn new(delegate_id: impl Into<String>, capability: &Capability, validated: bool) -> Option<Self> {
        Some(Self {
            delegate_id: delegate_id.into(),
            capability_key: capability.key()?,
            validated,
            checked_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_capability_key_normalizes_default_port() {
        let capability = Capability::http("https://Registry.Example.com/v2/");
        assert_eq!(
            capability.key().as_deref(),
            Some("https://registry.example.com:443")
        );
        assert_eq!(capability.evaluation_mode(), CapabilityEvaluationMode::Agent);
    }

    #[test]
    fn test_malformed_capabilities_have_no_key() {
        assert!(Capability::http("not a url").key().is_none());
        assert!(Capability::SocketConnection {
            host: "".into(),
            port: 22
        }
        .key()
        .is_none());
        assert!(Capability::selector(Vec::<String>::new()).key().is_none());
        assert!(Capability::Unknown.key().is_none());
    }

    #[test]
    fn test_unknown_capability_type_deserializes_to_unknown() {
        let capability: Capability =
            serde_json::from_str(r#"{"type":"CHROME_BROWSER","version":"120"}"#).unwrap();
        assert_eq!(capability, Capability::Unknown);
    }

    #[test]
    fn test_selector_matches_all_tags() {
        let capability = Capability::selector(["k8s", "Prod"]);
        let tags = vec!["prod".to_string(), "k8s".to_string(), "eu".to_string()];
        assert!(capability.matches_tags(&tags));
        assert!(!capability.matches_tags(&tags[..1]));
    }
}
