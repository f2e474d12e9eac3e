//! Maps pipeline outcomes to HTTP responses.

use crate::backend::BackendResponse;
use crate::context::RequestContext;
use crate::error::{ErrorType, GatewayError};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Response plus what the access log needs to know about it.
#[derive(Debug)]
pub struct Composed {
    pub response: Response,
    pub status: u16,
    pub error_type: Option<ErrorType>,
    pub error_msg: String,
    pub outcome: &'static str,
}

/// JSON body templates for gateway-composed responses, keyed by error type.
///
/// String values may contain `{detail}`, `{apiKeyId}`, `{requestId}`,
/// `{method}` and `{path}`.
#[derive(Debug, Clone)]
pub struct ResponseComposer {
    templates: HashMap<ErrorType, Value>,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        let templates = HashMap::from([
            (ErrorType::InvalidApiKey, json!({ "message": "Forbidden" })),
            (
                ErrorType::Throttled,
                json!({
                    "error": "Too Many Requests",
                    "message": "Rate limit exceeded. Retry after a moment."
                }),
            ),
            (
                ErrorType::QuotaExceeded,
                json!({
                    "error": "Quota Exceeded",
                    "message": "Request quota exhausted for the current period."
                }),
            ),
            (
                ErrorType::NotFound,
                json!({ "error": "Not Found", "message": "{detail}" }),
            ),
            (
                ErrorType::MethodNotAllowed,
                json!({ "error": "Method not allowed: {method}" }),
            ),
            (ErrorType::BadRequest, json!({ "error": "{detail}" })),
            (
                ErrorType::BackendError,
                json!({ "error": "Bad Gateway", "message": "{detail}" }),
            ),
            (
                ErrorType::BackendTimeout,
                json!({ "error": "Gateway Timeout", "message": "{detail}" }),
            ),
            (
                ErrorType::ClientClosed,
                json!({ "error": "Client Closed Request" }),
            ),
        ]);
        Self { templates }
    }
}

impl ResponseComposer {
    /// Defaults with operator overrides applied on top.
    pub fn with_overrides(overrides: &HashMap<ErrorType, Value>) -> Self {
        let mut composer = Self::default();
        for (error_type, template) in overrides {
            composer.templates.insert(*error_type, template.clone());
        }
        composer
    }

    pub fn compose(
        &self,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
        outcome: Result<BackendResponse, GatewayError>,
    ) -> Composed {
        match outcome {
            Ok(backend) => {
                let status = backend.status.as_u16();
                Composed {
                    response: (backend.status, backend.headers, Body::from(backend.body))
                        .into_response(),
                    status,
                    error_type: None,
                    error_msg: String::new(),
                    outcome: "OK",
                }
            }
            Err(err) => self.compose_error(ctx, api_key_id, &err),
        }
    }

    pub fn compose_error(
        &self,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
        err: &GatewayError,
    ) -> Composed {
        let error_type = err.error_type();
        let detail = err.to_string();
        let body = self.render(error_type, ctx, api_key_id, &detail);
        let status = StatusCode::from_u16(error_type.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match err {
            GatewayError::Throttled { retry_after, .. }
            | GatewayError::QuotaExceeded { retry_after, .. } => {
                if let Some(secs) = retry_after_secs(*retry_after) {
                    headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
            }
            GatewayError::MethodNotAllowed { allowed, .. } => {
                if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                    headers.insert(header::ALLOW, value);
                }
            }
            _ => {}
        }

        let response = (status, headers, Body::from(body.to_string())).into_response();
        Composed {
            response,
            status: status.as_u16(),
            error_type: Some(error_type),
            error_msg: detail,
            outcome: err.outcome(),
        }
    }

    fn render(
        &self,
        error_type: ErrorType,
        ctx: &RequestContext,
        api_key_id: Option<&str>,
        detail: &str,
    ) -> Value {
        let template = self
            .templates
            .get(&error_type)
            .cloned()
            .unwrap_or_else(|| json!({ "error": "{detail}" }));

        let method = ctx.method.to_string();
        let vars = [
            ("{detail}", detail),
            ("{apiKeyId}", api_key_id.unwrap_or("")),
            ("{requestId}", ctx.request_id.as_str()),
            ("{method}", method.as_str()),
            ("{path}", ctx.path.as_str()),
        ];
        substitute(template, &vars)
    }
}

/// Whole seconds, rounded up and at least 1. `None` for a bucket that never refills.
fn retry_after_secs(wait: Duration) -> Option<u64> {
    if wait == Duration::MAX {
        return None;
    }
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    Some(secs.max(1))
}

fn substitute(value: Value, vars: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => {
            let rendered = vars
                .iter()
                .fold(s, |acc, (placeholder, replacement)| acc.replace(placeholder, replacement));
            Value::String(rendered)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, vars)))
                .collect(),
        ),
        other => other,
    }
}
