//! Immutable, indexed view of a validated policy document.

use crate::error::{ConfigError, ErrorType, GatewayResult};
use crate::policy::{BackendKind, PolicyDocument, QuotaSettings, ThrottleSettings};
use crate::policy_validator::PolicyValidator;
use crate::router::RouteTable;
use axum::http::Method;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackendTarget {
    pub kind: BackendKind,
    pub address: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    /// `{path}/{VERB}`, also the method throttle scope.
    pub id: String,
    pub path: String,
    pub verb: Method,
    pub api_key_required: bool,
    pub body_required: bool,
    /// Method override, or the stage settings for an independent bucket.
    pub throttle: ThrottleSettings,
    pub backend: BackendTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsagePlan {
    pub name: String,
    pub throttle: ThrottleSettings,
    pub quota: QuotaSettings,
    pub api_key_ids: Vec<String>,
}

/// Loaded once at startup and never mutated.
#[derive(Debug)]
pub struct PolicyStore {
    stage: ThrottleSettings,
    routes: RouteTable,
    keys_by_value: HashMap<String, ApiKey>,
    plans_by_key: HashMap<String, Arc<UsagePlan>>,
    plan_count: usize,
    gateway_responses: HashMap<ErrorType, serde_json::Value>,
}

impl PolicyStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_document(PolicyDocument::from_file(path)?)
    }

    pub fn from_document(document: PolicyDocument) -> Result<Self, ConfigError> {
        PolicyValidator::validate(&document)?;

        let mut routes = RouteTable::new();
        for spec in &document.routes {
            let verb = PolicyValidator::parse_verb(spec)?;
            let body_required = spec
                .body_required
                .unwrap_or(matches!(verb, Method::POST | Method::PUT | Method::PATCH));
            let entry = RouteEntry {
                id: format!("{}/{}", spec.path, verb),
                path: spec.path.clone(),
                verb,
                api_key_required: spec.api_key_required,
                body_required,
                throttle: spec.method_throttle.unwrap_or(document.stage),
                backend: BackendTarget {
                    kind: spec.backend.kind,
                    address: spec.backend.address.clone(),
                    timeout: spec
                        .backend
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(document.default_backend_timeout),
                },
            };
            if routes.insert(entry).is_some() {
                return Err(ConfigError::DuplicateRoute {
                    path: spec.path.clone(),
                    verb: spec.verb.clone(),
                });
            }
        }

        let keys_by_value = document
            .api_keys
            .iter()
            .map(|key| {
                (
                    key.presented_value().to_string(),
                    ApiKey {
                        id: key.id.clone(),
                        enabled: key.enabled,
                    },
                )
            })
            .collect();

        let mut plans_by_key = HashMap::new();
        for spec in &document.usage_plans {
            let plan = Arc::new(UsagePlan {
                name: spec.name.clone(),
                throttle: spec.throttle(),
                quota: spec.quota,
                api_key_ids: spec.api_key_ids.clone(),
            });
            for key in &spec.api_key_ids {
                plans_by_key.insert(key.clone(), Arc::clone(&plan));
            }
        }

        tracing::info!(
            routes = routes.len(),
            api_keys = document.api_keys.len(),
            usage_plans = document.usage_plans.len(),
            "Policy loaded"
        );

        Ok(Self {
            stage: document.stage,
            routes,
            keys_by_value,
            plans_by_key,
            plan_count: document.usage_plans.len(),
            gateway_responses: document.gateway_responses,
        })
    }

    pub fn stage(&self) -> ThrottleSettings {
        self.stage
    }

    pub fn resolve_route(&self, path: &str, method: &Method) -> GatewayResult<&RouteEntry> {
        self.routes.resolve(path, method)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Look up a key by the value presented in the request header.
    pub fn api_key(&self, presented: &str) -> Option<&ApiKey> {
        self.keys_by_value.get(presented)
    }

    pub fn plan_for_key(&self, key_id: &str) -> Option<Arc<UsagePlan>> {
        self.plans_by_key.get(key_id).cloned()
    }

    pub fn gateway_responses(&self) -> &HashMap<ErrorType, serde_json::Value> {
        &self.gateway_responses
    }

    pub fn api_key_count(&self) -> usize {
        self.keys_by_value.len()
    }

    pub fn plan_count(&self) -> usize {
        self.plan_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> PolicyStore {
        let doc = json!({
            "stage": { "rateLimit": 10, "burstLimit": 5 },
            "defaultBackendTimeout": "2s",
            "routes": [
                { "path": "/orders", "verb": "GET",
                  "backend": { "kind": "Invoke", "address": "orders" } },
                { "path": "/orders", "verb": "POST",
                  "methodThrottle": { "rateLimit": 3, "burstLimit": 2 },
                  "backend": { "kind": "Invoke", "address": "orders", "timeoutMs": 250 } },
                { "path": "/ping", "verb": "POST", "apiKeyRequired": false, "bodyRequired": false,
                  "backend": { "kind": "Invoke", "address": "orders" } }
            ],
            "usagePlans": [
                { "name": "basic", "rateLimit": 5, "burstLimit": 10,
                  "quota": { "limit": 10, "periodUnit": "day" },
                  "apiKeyIds": ["basic-client", "second-client"] }
            ],
            "apiKeys": [
                { "id": "basic-client", "value": "s3cret" },
                { "id": "second-client", "enabled": false }
            ]
        });
        PolicyStore::from_document(PolicyDocument::from_json(&doc.to_string()).unwrap()).unwrap()
    }

    #[test]
    fn test_method_throttle_inherits_stage() {
        let store = store();
        let get = store.resolve_route("/orders", &Method::GET).unwrap();
        assert_eq!(get.throttle, store.stage());
        let post = store.resolve_route("/orders", &Method::POST).unwrap();
        assert_eq!(post.throttle.burst_limit, 2);
    }

    #[test]
    fn test_backend_timeout_defaults() {
        let store = store();
        let get = store.resolve_route("/orders", &Method::GET).unwrap();
        assert_eq!(get.backend.timeout, Duration::from_secs(2));
        let post = store.resolve_route("/orders", &Method::POST).unwrap();
        assert_eq!(post.backend.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_body_required_defaults_by_verb() {
        let store = store();
        assert!(!store.resolve_route("/orders", &Method::GET).unwrap().body_required);
        assert!(store.resolve_route("/orders", &Method::POST).unwrap().body_required);
        assert!(!store.resolve_route("/ping", &Method::POST).unwrap().body_required);
    }

    #[test]
    fn test_keys_indexed_by_presented_value() {
        let store = store();
        assert!(store.api_key("basic-client").is_none());
        assert_eq!(store.api_key("s3cret").unwrap().id, "basic-client");
        assert!(!store.api_key("second-client").unwrap().enabled);
        assert_eq!(store.plan_for_key("basic-client").unwrap().name, "basic");
        assert_eq!(store.plan_count(), 1);
    }
}
