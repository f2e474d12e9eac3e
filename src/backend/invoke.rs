use super::{is_hop_by_hop, Backend, BackendResponse};
use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult, InvokeError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Normalized request handed to a compute unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeEnvelope {
    pub request_id: String,
    pub http_method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub api_key_id: Option<String>,
    pub source_ip: String,
}

impl InvokeEnvelope {
    pub fn from_context(ctx: &RequestContext, api_key_id: Option<&str>) -> Self {
        let headers = ctx
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = if ctx.body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&ctx.body).into_owned())
        };

        Self {
            request_id: ctx.request_id.clone(),
            http_method: ctx.method.to_string(),
            path: ctx.path.clone(),
            query_string: ctx.query.clone(),
            headers,
            body,
            api_key_id: api_key_id.map(str::to_string),
            source_ip: ctx.source_ip.clone(),
        }
    }
}

/// Normalized reply from a compute unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl InvokeResponse {
    pub fn json(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: body.into(),
        }
    }
}

/// A synchronously invoked compute unit.
#[async_trait]
pub trait InvokeTarget: Send + Sync {
    async fn invoke(&self, envelope: InvokeEnvelope) -> Result<InvokeResponse, InvokeError>;
}

/// Compute units available to Invoke routes, by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn InvokeTarget>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, target: Arc<dyn InvokeTarget>) {
        self.functions.insert(name.into(), target);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InvokeTarget>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

pub struct InvokeBackend {
    name: String,
    target: Arc<dyn InvokeTarget>,
}

impl InvokeBackend {
    pub fn new(name: String, target: Arc<dyn InvokeTarget>) -> Self {
        Self { name, target }
    }
}

#[async_trait]
impl Backend for InvokeBackend {
    async fn call(
        &self,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
    ) -> GatewayResult<BackendResponse> {
        let envelope = InvokeEnvelope::from_context(ctx, api_key_id);
        let reply = self.target.invoke(envelope).await?;

        let status = StatusCode::from_u16(reply.status_code).map_err(|_| {
            GatewayError::BackendUnavailable(format!(
                "function '{}' returned invalid status {}",
                self.name, reply.status_code
            ))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                tracing::debug!(function = %self.name, header = %name, "Dropping invalid response header");
                continue;
            };
            if !is_hop_by_hop(name.as_str()) {
                headers.insert(name, value);
            }
        }

        Ok(BackendResponse {
            status,
            headers,
            body: Bytes::from(reply.body),
        })
    }

    fn describe(&self) -> String {
        format!("invoke:{}", self.name)
    }
}
