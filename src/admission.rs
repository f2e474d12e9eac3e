//! API-key admission.

use crate::error::{GatewayError, GatewayResult};
use crate::policy_store::{PolicyStore, UsagePlan};
use axum::http::{HeaderMap, HeaderName};
use std::sync::Arc;

pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// A caller whose key was accepted, with the plan that governs it.
#[derive(Debug, Clone)]
pub struct Admission {
    pub api_key_id: String,
    pub plan: Arc<UsagePlan>,
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
    store: Arc<PolicyStore>,
    header: HeaderName,
}

impl AdmissionController {
    pub fn new(store: Arc<PolicyStore>, header: HeaderName) -> Self {
        Self { store, header }
    }

    /// Validate the presented key and resolve its usage plan.
    pub fn admit(&self, headers: &HeaderMap) -> GatewayResult<Admission> {
        let presented = Self::extract_key(headers, &self.header).ok_or(GatewayError::MissingApiKey)?;

        let key = self
            .store
            .api_key(presented)
            .filter(|key| key.enabled)
            .ok_or(GatewayError::InvalidApiKey)?;

        // Plan cardinality is checked at load time; a miss here means the key
        // is unusable rather than a server fault.
        let plan = self
            .store
            .plan_for_key(&key.id)
            .ok_or(GatewayError::InvalidApiKey)?;

        Ok(Admission {
            api_key_id: key.id.clone(),
            plan,
        })
    }

    /// Read the key header as an opaque value. Empty or non-UTF-8 values count as absent.
    pub fn extract_key<'a>(headers: &'a HeaderMap, header: &HeaderName) -> Option<&'a str> {
        headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }
}
