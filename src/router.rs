use crate::error::{GatewayError, GatewayResult};
use crate::policy_store::RouteEntry;
use axum::http::Method;
use std::collections::HashMap;

/// Exact-match (path, verb) lookup table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, HashMap<Method, RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous entry for the same (path, verb), if any.
    pub fn insert(&mut self, entry: RouteEntry) -> Option<RouteEntry> {
        self.routes
            .entry(entry.path.clone())
            .or_default()
            .insert(entry.verb.clone(), entry)
    }

    /// Resolve a request to its route. An unknown path is `RouteNotFound`; a
    /// known path without the verb is `MethodNotAllowed`.
    pub fn resolve(&self, path: &str, method: &Method) -> GatewayResult<&RouteEntry> {
        let verbs = self
            .routes
            .get(path)
            .ok_or_else(|| GatewayError::RouteNotFound(path.to_string()))?;

        verbs.get(method).ok_or_else(|| {
            let mut allowed: Vec<String> = verbs.keys().map(|m| m.to_string()).collect();
            allowed.sort();
            GatewayError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
                allowed,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values().flat_map(HashMap::values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BackendKind, ThrottleSettings};
    use crate::policy_store::BackendTarget;
    use std::time::Duration;

    fn entry(path: &str, verb: Method) -> RouteEntry {
        RouteEntry {
            id: format!("{}/{}", path, verb),
            path: path.to_string(),
            verb,
            api_key_required: true,
            body_required: false,
            throttle: ThrottleSettings {
                rate_limit: 10.0,
                burst_limit: 5,
            },
            backend: BackendTarget {
                kind: BackendKind::Invoke,
                address: "orders".to_string(),
                timeout: Duration::from_secs(1),
            },
        }
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.insert(entry("/orders", Method::GET));
        table.insert(entry("/orders", Method::POST));
        table.insert(entry("/products", Method::GET));
        table
    }

    #[test]
    fn test_resolve_exact_match() {
        let table = table();
        let route = table.resolve("/orders", &Method::POST).unwrap();
        assert_eq!(route.id, "/orders/POST");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let err = table().resolve("/missing", &Method::GET).unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(path) if path == "/missing"));
    }

    #[test]
    fn test_prefix_does_not_match() {
        let err = table().resolve("/orders/123", &Method::GET).unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));
    }

    #[test]
    fn test_unsupported_verb_is_method_not_allowed() {
        let err = table().resolve("/orders", &Method::DELETE).unwrap_err();
        match err {
            GatewayError::MethodNotAllowed { allowed, .. } => {
                assert_eq!(allowed, vec!["GET".to_string(), "POST".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_insert_reports_duplicate() {
        let mut table = table();
        assert!(table.insert(entry("/products", Method::GET)).is_some());
    }
}
