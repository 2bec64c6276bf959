//! Bridge settings

use serde::{Deserialize, Serialize};

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Global object holding `require`, `proxy` and the callback dispatch table.
    pub namespace: String,
    /// What `String(proxy)` yields for proxied host values.
    pub proxy_marker: String,
    /// Publish the namespace object on the global object at construction.
    pub install_namespace: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: "Tether".to_string(),
            proxy_marker: "[tether Proxy]".to_string(),
            install_namespace: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_documents_keep_defaults() {
        let config = BridgeConfig::from_json_str(r#"{"namespace": "Host"}"#).unwrap();
        assert_eq!(config.namespace, "Host");
        assert_eq!(config.proxy_marker, "[tether Proxy]");
        assert!(config.install_namespace);
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(BridgeConfig::from_json_str(r#"{"namespace": 1}"#).is_err());
    }
}
