//! Policy document: the declarative configuration surface loaded at startup.
//!
//! Field-level rules are checked with `validator`; cross-references (plans to
//! keys, routes to functions, duplicates) are checked by
//! [`crate::policy_validator::PolicyValidator`].

use crate::error::{ConfigError, ErrorType};
use crate::quota::QuotaPeriod;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

static ROUTE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9._~!$&'()*+,;=:@-]+(/[A-Za-z0-9._~!$&'()*+,;=:@-]+)*)?$").unwrap());

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

fn default_backend_timeout() -> Duration {
    Duration::from_secs(29)
}

fn default_true() -> bool {
    true
}

/// Token-bucket parameters for one throttle scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleSettings {
    /// Sustained refill rate, tokens per second.
    #[validate(range(min = 0.0))]
    pub rate_limit: f64,
    /// Bucket capacity.
    #[validate(range(min = 1))]
    pub burst_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSettings {
    #[validate(range(min = 1))]
    pub limit: u64,
    pub period_unit: QuotaPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(alias = "invoke", alias = "INVOKE")]
    Invoke,
    #[serde(alias = "httpProxy", alias = "HTTP_PROXY")]
    HttpProxy,
}

/// Where a route dispatches to. For `Invoke` the address names a registered
/// function; for `HttpProxy` it is the upstream base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub kind: BackendKind,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(range(min = 1, max = 300000))]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[validate(regex(path = *ROUTE_PATH, message = "route path must be an absolute path"))]
    pub path: String,
    #[validate(length(min = 1))]
    pub verb: String,
    #[serde(default = "default_true")]
    pub api_key_required: bool,
    /// Defaults to true for POST, PUT and PATCH.
    pub body_required: Option<bool>,
    #[validate(nested)]
    pub backend: BackendSpec,
    #[validate(nested)]
    pub method_throttle: Option<ThrottleSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsagePlanSpec {
    #[validate(regex(path = *IDENTIFIER))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub rate_limit: f64,
    #[validate(range(min = 1))]
    pub burst_limit: u32,
    #[validate(nested)]
    pub quota: QuotaSettings,
    pub api_key_ids: Vec<String>,
}

impl UsagePlanSpec {
    pub fn throttle(&self) -> ThrottleSettings {
        ThrottleSettings {
            rate_limit: self.rate_limit,
            burst_limit: self.burst_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySpec {
    #[validate(regex(path = *IDENTIFIER))]
    pub id: String,
    /// Secret presented in the key header. Falls back to `id`.
    #[validate(length(min = 1))]
    pub value: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl ApiKeySpec {
    pub fn presented_value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.id)
    }
}

/// Root of the policy file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    #[validate(nested)]
    pub stage: ThrottleSettings,
    #[validate(nested)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    #[validate(nested)]
    pub usage_plans: Vec<UsagePlanSpec>,
    #[serde(default)]
    #[validate(nested)]
    pub api_keys: Vec<ApiKeySpec>,
    #[serde(default = "default_backend_timeout", with = "humantime_serde")]
    pub default_backend_timeout: Duration,
    #[serde(default)]
    pub gateway_responses: HashMap<ErrorType, serde_json::Value>,
}

impl PolicyDocument {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let document: PolicyDocument = serde_json::from_str(json)?;
        document.validate()?;
        Ok(document)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "stage": { "rateLimit": 10, "burstLimit": 5 },
            "routes": [{
                "path": "/products",
                "verb": "GET",
                "backend": { "kind": "Invoke", "address": "products" }
            }]
        })
    }

    #[test]
    fn test_parse_minimal_document() {
        let doc = PolicyDocument::from_json(&minimal().to_string()).unwrap();
        assert_eq!(doc.stage.burst_limit, 5);
        assert_eq!(doc.stage.rate_limit, 10.0);
        assert!(doc.routes[0].api_key_required);
        assert_eq!(doc.default_backend_timeout, Duration::from_secs(29));
        assert!(doc.usage_plans.is_empty());
    }

    #[test]
    fn test_humantime_default_timeout() {
        let mut doc = minimal();
        doc["defaultBackendTimeout"] = json!("1500ms");
        let doc = PolicyDocument::from_json(&doc.to_string()).unwrap();
        assert_eq!(doc.default_backend_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_zero_burst() {
        let mut doc = minimal();
        doc["stage"]["burstLimit"] = json!(0);
        let err = PolicyDocument::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_relative_route_path() {
        let mut doc = minimal();
        doc["routes"][0]["path"] = json!("products");
        assert!(matches!(
            PolicyDocument::from_json(&doc.to_string()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let mut doc = minimal();
        doc["routes"][0]["backend"]["timeoutMs"] = json!(0);
        assert!(matches!(
            PolicyDocument::from_json(&doc.to_string()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_gateway_response_overrides_parse() {
        let mut doc = minimal();
        doc["gatewayResponses"] = json!({ "THROTTLED": { "error": "slow down" } });
        let doc = PolicyDocument::from_json(&doc.to_string()).unwrap();
        assert_eq!(
            doc.gateway_responses[&ErrorType::Throttled],
            json!({ "error": "slow down" })
        );
    }

    #[test]
    fn test_api_key_value_falls_back_to_id() {
        let key = ApiKeySpec {
            id: "basic-client".into(),
            value: None,
            enabled: true,
            description: None,
        };
        assert_eq!(key.presented_value(), "basic-client");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PolicyDocument::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
