//! The request pipeline: route, admission, throttle, body, validation,
//! dispatch, composition and access logging.
//!
//! Everything up to the throttle decision runs on the request head, so
//! rejections never wait for an upload.

use crate::access_log::{AccessLogGuard, AccessLogger, Completion, LogSink};
use crate::admission::{Admission, AdmissionController, DEFAULT_API_KEY_HEADER};
use crate::backend::{BackendInvoker, BackendResponse, FunctionRegistry};
use crate::clock::Clock;
use crate::context::RequestContext;
use crate::error::{ConfigError, GatewayError, GatewayResult};
use crate::policy_store::PolicyStore;
use crate::rate_state::RateState;
use crate::response::ResponseComposer;
use crate::throttler::ThrottleEngine;
use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use http_body_util::LengthLimitError;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Process-level knobs that are not part of the policy document.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_key_header: HeaderName,
    pub max_concurrent_backend_calls: usize,
    pub max_body_bytes: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_key_header: HeaderName::from_static(DEFAULT_API_KEY_HEADER),
            max_concurrent_backend_calls: 64,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

pub struct Gateway {
    store: Arc<PolicyStore>,
    admission: AdmissionController,
    throttle: ThrottleEngine,
    invoker: BackendInvoker,
    composer: ResponseComposer,
    logger: AccessLogger,
    max_body_bytes: usize,
    started_at: Instant,
}

impl Gateway {
    pub fn new(
        store: Arc<PolicyStore>,
        settings: GatewaySettings,
        functions: &FunctionRegistry,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let invoker =
            BackendInvoker::new(&store, functions, settings.max_concurrent_backend_calls)?;
        let state = Arc::new(RateState::new(clock));

        Ok(Self {
            admission: AdmissionController::new(Arc::clone(&store), settings.api_key_header),
            throttle: ThrottleEngine::new(state, store.stage()),
            composer: ResponseComposer::with_overrides(store.gateway_responses()),
            logger: AccessLogger::new(sink),
            invoker,
            max_body_bytes: settings.max_body_bytes,
            started_at: Instant::now(),
            store,
        })
    }

    /// Run one request through the pipeline. Always produces a response and
    /// exactly one access record, including when the future is dropped early.
    pub async fn handle(&self, request: Request) -> Response {
        let mut ctx = RequestContext::from_request(&request);
        let mut guard = self.logger.begin(&ctx);

        let mut admitted = None;
        let outcome = self
            .process(&mut ctx, request.into_body(), &mut admitted, &mut guard)
            .await;

        let api_key_id = admitted.as_ref().map(|a: &Admission| a.api_key_id.as_str());
        let composed = self.composer.compose(&ctx, api_key_id, outcome);
        debug!(
            request_id = %ctx.request_id,
            status = composed.status,
            outcome = composed.outcome,
            "Request completed"
        );

        let mut response = composed.response;
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        guard.finish(Completion {
            status: composed.status,
            error_type: composed.error_type,
            error_msg: composed.error_msg,
            outcome: composed.outcome,
        });
        response
    }

    async fn process(
        &self,
        ctx: &mut RequestContext,
        body: Body,
        admitted: &mut Option<Admission>,
        guard: &mut AccessLogGuard,
    ) -> GatewayResult<BackendResponse> {
        let route = self.store.resolve_route(&ctx.path, &ctx.method)?;

        if route.api_key_required {
            let admission = self.admission.admit(&ctx.headers)?;
            guard.set_api_key_id(&admission.api_key_id);
            *admitted = Some(admission);
        }

        let plan = admitted
            .as_ref()
            .map(|a| (a.plan.as_ref(), a.api_key_id.as_str()));
        self.throttle.check(route, plan)?;

        ctx.body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) if exceeds_limit(&e) => {
                if route.body_required {
                    return Err(GatewayError::BadRequest(format!(
                        "Request body exceeds {} bytes",
                        self.max_body_bytes
                    )));
                }
                debug!(
                    request_id = %ctx.request_id,
                    limit = self.max_body_bytes,
                    "Dropping oversized body on read route"
                );
                Bytes::new()
            }
            Err(e) => {
                return Err(GatewayError::BadRequest(format!(
                    "Failed to read request body: {}",
                    e
                )))
            }
        };

        if route.body_required {
            validate_body(ctx)?;
        }

        let api_key_id = admitted.as_ref().map(|a| a.api_key_id.as_str());
        self.invoker.dispatch(route, ctx, api_key_id).await
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn rate_state(&self) -> &Arc<RateState> {
        self.throttle.state()
    }

    pub fn invoker(&self) -> &BackendInvoker {
        &self.invoker
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.store.routes().len())
            .field("invoker", &self.invoker)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

fn exceeds_limit(err: &axum::Error) -> bool {
    std::error::Error::source(err).map_or(false, |source| source.is::<LengthLimitError>())
}

/// Write routes need a non-blank body, and a parseable one when it is JSON or untyped.
fn validate_body(ctx: &RequestContext) -> GatewayResult<()> {
    if ctx.body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::BadRequest("Request body is required".to_string()));
    }

    let expects_json = ctx.content_type().map_or(true, is_json_media_type);
    if expects_json && serde_json::from_slice::<serde::de::IgnoredAny>(&ctx.body).is_err() {
        return Err(GatewayError::BadRequest(
            "Request body must be valid JSON".to_string(),
        ));
    }
    Ok(())
}

fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::MemorySink;
    use crate::backend::{InvokeEnvelope, InvokeResponse, InvokeTarget};
    use crate::clock::ManualClock;
    use crate::error::InvokeError;
    use crate::policy::PolicyDocument;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl InvokeTarget for Echo {
        async fn invoke(&self, envelope: InvokeEnvelope) -> Result<InvokeResponse, InvokeError> {
            Ok(InvokeResponse::json(
                200,
                json!({ "apiKeyId": envelope.api_key_id }).to_string(),
            ))
        }
    }

    struct Slow {
        completed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl InvokeTarget for Slow {
        async fn invoke(&self, _envelope: InvokeEnvelope) -> Result<InvokeResponse, InvokeError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.completed.store(true, Ordering::SeqCst);
            Ok(InvokeResponse::json(200, "{}"))
        }
    }

    fn functions() -> FunctionRegistry {
        let mut functions = FunctionRegistry::new();
        functions.register("echo", Arc::new(Echo));
        functions.register(
            "slow",
            Arc::new(Slow {
                completed: Arc::new(AtomicBool::new(false)),
            }),
        );
        functions
    }

    fn gateway_with(sink: MemorySink, settings: GatewaySettings, functions: FunctionRegistry) -> Gateway {
        let doc = json!({
            "stage": { "rateLimit": 100, "burstLimit": 50 },
            "routes": [
                { "path": "/echo", "verb": "GET",
                  "backend": { "kind": "Invoke", "address": "echo" } },
                { "path": "/echo", "verb": "POST",
                  "backend": { "kind": "Invoke", "address": "echo" } },
                { "path": "/open", "verb": "GET", "apiKeyRequired": false,
                  "backend": { "kind": "Invoke", "address": "echo" } },
                { "path": "/slow", "verb": "GET", "apiKeyRequired": false,
                  "backend": { "kind": "Invoke", "address": "slow" } }
            ],
            "usagePlans": [
                { "name": "basic", "rateLimit": 5, "burstLimit": 10,
                  "quota": { "limit": 10, "periodUnit": "day" }, "apiKeyIds": ["basic-client"] }
            ],
            "apiKeys": [ { "id": "basic-client" } ]
        });
        let store = PolicyStore::from_document(PolicyDocument::from_json(&doc.to_string()).unwrap())
            .unwrap();
        Gateway::new(
            Arc::new(store),
            settings,
            &functions,
            Arc::new(sink),
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    fn gateway(sink: MemorySink) -> Gateway {
        gateway_with(sink, GatewaySettings::default(), functions())
    }

    fn small_body_gateway(sink: MemorySink) -> Gateway {
        let settings = GatewaySettings {
            max_body_bytes: 4,
            ..GatewaySettings::default()
        };
        gateway_with(sink, settings, functions())
    }

    fn request(method: &str, path: &str, key: Option<&str>, body: &'static str) -> Request {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_request_reaches_backend() {
        let sink = MemorySink::new();
        let gateway = gateway(sink.clone());

        let response = gateway
            .handle(request("GET", "/echo", Some("basic-client"), ""))
            .await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].api_key_id, "basic-client");
        assert_eq!(records[0].outcome, "OK");
        assert_eq!(
            response.headers()[REQUEST_ID_HEADER].to_str().unwrap(),
            records[0].request_id
        );
    }

    #[tokio::test]
    async fn test_route_resolved_before_admission() {
        let sink = MemorySink::new();
        let gateway = gateway(sink.clone());

        let response = gateway.handle(request("GET", "/missing", None, "")).await;
        assert_eq!(response.status(), 404);

        let response = gateway.handle(request("GET", "/open", None, "")).await;
        assert_eq!(response.status(), 200);
        assert_eq!(sink.records()[1].api_key_id, "");
    }

    #[tokio::test]
    async fn test_missing_key_is_forbidden() {
        let sink = MemorySink::new();
        let gateway = gateway(sink.clone());

        let response = gateway.handle(request("GET", "/echo", None, "")).await;
        assert_eq!(response.status(), 403);
        assert_eq!(sink.records()[0].error_type, "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn test_write_route_body_validation() {
        let sink = MemorySink::new();
        let gateway = gateway(sink.clone());

        let response = gateway
            .handle(request("POST", "/echo", Some("basic-client"), "   "))
            .await;
        assert_eq!(response.status(), 400);

        let response = gateway
            .handle(request("POST", "/echo", Some("basic-client"), "{not json"))
            .await;
        assert_eq!(response.status(), 400);

        let records = sink.records();
        assert_eq!(records[0].error_msg, "Request body is required");
        assert_eq!(records[1].error_msg, "Request body must be valid JSON");
    }

    #[test]
    fn test_non_json_content_type_skips_parse() {
        let request = Request::builder()
            .method("POST")
            .uri("/echo")
            .header("content-type", "text/plain")
            .body(Body::empty())
            .unwrap();
        let mut ctx = RequestContext::from_request(&request);
        ctx.body = Bytes::from_static(b"hello");
        assert!(validate_body(&ctx).is_ok());

        ctx.headers.insert(
            "content-type",
            HeaderValue::from_static("application/vnd.api+json; charset=utf-8"),
        );
        assert!(validate_body(&ctx).is_err());
    }

    #[tokio::test]
    async fn test_oversized_body_on_write_route_is_bad_request() {
        let sink = MemorySink::new();
        let gateway = small_body_gateway(sink.clone());

        let response = gateway
            .handle(request("POST", "/echo", Some("basic-client"), r#"{"much":"too long"}"#))
            .await;
        assert_eq!(response.status(), 400);
        assert_eq!(sink.records()[0].outcome, "BAD_REQUEST");
        assert_eq!(sink.records()[0].error_msg, "Request body exceeds 4 bytes");
    }

    #[tokio::test]
    async fn test_undefined_path_with_oversized_body_is_not_found() {
        let sink = MemorySink::new();
        let gateway = small_body_gateway(sink.clone());

        let response = gateway
            .handle(request("GET", "/nowhere", None, "0123456789"))
            .await;
        assert_eq!(response.status(), 404);
        assert_eq!(sink.records()[0].error_type, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_rejection_does_not_wait_for_body() {
        let sink = MemorySink::new();
        let gateway = small_body_gateway(sink.clone());

        let response = gateway
            .handle(request("POST", "/echo", None, "0123456789"))
            .await;
        assert_eq!(response.status(), 403);
        assert_eq!(sink.records()[0].error_type, "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn test_oversized_body_on_read_route_is_dropped() {
        let sink = MemorySink::new();
        let gateway = small_body_gateway(sink.clone());

        let response = gateway
            .handle(request("GET", "/open", None, "0123456789"))
            .await;
        assert_eq!(response.status(), 200);
        assert_eq!(sink.records()[0].outcome, "OK");
    }

    #[tokio::test]
    async fn test_client_disconnect_aborts_backend_and_logs_once() {
        let completed = Arc::new(AtomicBool::new(false));
        let mut functions = functions();
        functions.register(
            "slow",
            Arc::new(Slow {
                completed: Arc::clone(&completed),
            }),
        );
        let sink = MemorySink::new();
        let gateway = gateway_with(sink.clone(), GatewaySettings::default(), functions);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            gateway.handle(request("GET", "/slow", None, "")),
        )
        .await;
        assert!(abandoned.is_err());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 499);
        assert_eq!(records[0].error_type, "CLIENT_CLOSED");

        // Well past the point the call would have returned.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(gateway.invoker().in_flight(), 0);
        assert_eq!(sink.len(), 1);
    }
}
