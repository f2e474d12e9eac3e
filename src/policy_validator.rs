use crate::error::ConfigError;
use crate::policy::{BackendKind, PolicyDocument, RouteSpec};
use axum::http::Method;
use std::collections::{HashMap, HashSet};

/// Path prefix served by the gateway itself.
pub const RESERVED_PREFIX: &str = "/_gateway";

const SUPPORTED_VERBS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// Checks the cross-references of a policy document.
///
/// Field-level rules are already enforced by `Validate`; this covers what a
/// single field cannot see. The first violation found is returned.
pub struct PolicyValidator;

impl PolicyValidator {
    pub fn validate(document: &PolicyDocument) -> Result<(), ConfigError> {
        Self::validate_routes(&document.routes)?;
        Self::validate_keys_and_plans(document)?;
        Ok(())
    }

    /// Parses a route verb, accepting only the standard HTTP methods in upper case.
    pub fn parse_verb(route: &RouteSpec) -> Result<Method, ConfigError> {
        let unsupported = || ConfigError::UnsupportedVerb {
            path: route.path.clone(),
            verb: route.verb.clone(),
        };
        let method = Method::from_bytes(route.verb.as_bytes()).map_err(|_| unsupported())?;
        if SUPPORTED_VERBS.contains(&method) {
            Ok(method)
        } else {
            Err(unsupported())
        }
    }

    fn validate_routes(routes: &[RouteSpec]) -> Result<(), ConfigError> {
        let mut seen: HashSet<(&str, Method)> = HashSet::new();

        for route in routes {
            if route.path == RESERVED_PREFIX
                || route.path.starts_with(&format!("{}/", RESERVED_PREFIX))
            {
                return Err(ConfigError::ReservedPath(route.path.clone()));
            }

            let verb = Self::parse_verb(route)?;
            if !seen.insert((route.path.as_str(), verb)) {
                return Err(ConfigError::DuplicateRoute {
                    path: route.path.clone(),
                    verb: route.verb.clone(),
                });
            }

            if route.backend.kind == BackendKind::HttpProxy {
                Self::validate_upstream(route)?;
            }
        }

        Ok(())
    }

    fn validate_upstream(route: &RouteSpec) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUpstream {
            route: format!("{} {}", route.verb, route.path),
            address: route.backend.address.clone(),
            reason,
        };

        let url = reqwest::Url::parse(&route.backend.address).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(())
    }

    fn validate_keys_and_plans(document: &PolicyDocument) -> Result<(), ConfigError> {
        let mut key_ids: HashSet<&str> = HashSet::new();
        let mut key_values: HashSet<&str> = HashSet::new();
        for key in &document.api_keys {
            if !key_ids.insert(key.id.as_str()) {
                return Err(ConfigError::DuplicateApiKey(key.id.clone()));
            }
            if !key_values.insert(key.presented_value()) {
                return Err(ConfigError::DuplicateApiKeyValue(key.id.clone()));
            }
        }

        let mut plan_names: HashSet<&str> = HashSet::new();
        let mut plans_by_key: HashMap<&str, Vec<String>> = HashMap::new();
        for plan in &document.usage_plans {
            if !plan_names.insert(plan.name.as_str()) {
                return Err(ConfigError::DuplicatePlan(plan.name.clone()));
            }
            if plan.api_key_ids.is_empty() {
                return Err(ConfigError::PlanWithoutKeys(plan.name.clone()));
            }
            for key in &plan.api_key_ids {
                if !key_ids.contains(key.as_str()) {
                    return Err(ConfigError::UnknownApiKey {
                        plan: plan.name.clone(),
                        key: key.clone(),
                    });
                }
                let plans = plans_by_key.entry(key.as_str()).or_default();
                if !plans.contains(&plan.name) {
                    plans.push(plan.name.clone());
                }
            }
        }

        // Every key belongs to exactly one plan.
        for key in &document.api_keys {
            match plans_by_key.get(key.id.as_str()) {
                None => return Err(ConfigError::KeyWithoutPlan(key.id.clone())),
                Some(plans) if plans.len() > 1 => {
                    return Err(ConfigError::KeyInMultiplePlans {
                        key: key.id.clone(),
                        plans: plans.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}
