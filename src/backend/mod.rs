//! Backend dispatch.
//!
//! Each route is bound at startup to one [`Backend`]: an [`InvokeBackend`]
//! that calls a registered compute unit, or an [`HttpProxyBackend`] that
//! forwards to a fixed upstream. [`BackendInvoker`] applies the route timeout
//! and the process-wide concurrency cap around either one. Nothing is retried.

mod invoke;
mod proxy;

pub use invoke::{FunctionRegistry, InvokeBackend, InvokeEnvelope, InvokeResponse, InvokeTarget};
pub use proxy::HttpProxyBackend;

use crate::context::RequestContext;
use crate::error::{ConfigError, GatewayError, GatewayResult};
use crate::policy::BackendKind;
use crate::policy_store::{PolicyStore, RouteEntry};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Normalized backend reply, relayed to the caller unmodified.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Perform the call. Unreachable or failing backends map to
    /// `BackendUnavailable`; any status the backend reports is returned as-is.
    async fn call(
        &self,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
    ) -> GatewayResult<BackendResponse>;

    fn describe(&self) -> String;
}

pub struct BackendInvoker {
    backends: HashMap<String, Arc<dyn Backend>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BackendInvoker {
    /// Bind every route in the store to its backend. Fails if an Invoke route
    /// names a function that is not registered.
    pub fn new(
        store: &PolicyStore,
        functions: &FunctionRegistry,
        max_concurrent: usize,
    ) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidSetting(
                "max concurrent backend calls must be greater than 0".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::InvalidSetting(format!("failed to build HTTP client: {}", e)))?;

        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        for route in store.routes().iter() {
            let backend: Arc<dyn Backend> = match route.backend.kind {
                BackendKind::Invoke => {
                    let target = functions.get(&route.backend.address).ok_or_else(|| {
                        ConfigError::UnknownFunction {
                            route: route.id.clone(),
                            function: route.backend.address.clone(),
                        }
                    })?;
                    Arc::new(InvokeBackend::new(route.backend.address.clone(), target))
                }
                BackendKind::HttpProxy => Arc::new(HttpProxyBackend::new(
                    &route.path,
                    &route.backend.address,
                    client.clone(),
                )?),
            };
            debug!(route = %route.id, backend = %backend.describe(), "Bound route");
            backends.insert(route.id.clone(), backend);
        }

        Ok(Self {
            backends,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Call the route's backend. Waiting for a concurrency permit counts
    /// against the route timeout.
    pub async fn dispatch(
        &self,
        route: &RouteEntry,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
    ) -> GatewayResult<BackendResponse> {
        let backend = self.backends.get(&route.id).ok_or_else(|| {
            GatewayError::BackendUnavailable(format!("no backend bound to {}", route.id))
        })?;
        let timeout = route.backend.timeout;

        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| GatewayError::BackendUnavailable("backend pool closed".to_string()))?;
            backend.call(ctx, api_key_id).await
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                warn!(request_id = %ctx.request_id, backend = %backend.describe(), error = %err, "Backend call failed");
                Err(err)
            }
            Err(_) => {
                warn!(
                    request_id = %ctx.request_id,
                    backend = %backend.describe(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Backend call timed out"
                );
                Err(GatewayError::BackendTimeout(timeout))
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl std::fmt::Debug for BackendInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInvoker")
            .field("routes", &self.backends.len())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

/// Headers that describe a single connection and are never forwarded.
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
