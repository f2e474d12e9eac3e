use super::{is_hop_by_hop, Backend, BackendResponse};
use crate::context::RequestContext;
use crate::error::{ConfigError, GatewayError, GatewayResult};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::{Client, Url};
use tracing::debug;

/// Transparent HTTP forwarding to a fixed upstream base address.
///
/// The request is sent as-is (method, headers minus hop-by-hop and `host`,
/// body, query string) to `{base}{suffix}`, where the suffix is whatever
/// follows the route path. The upstream reply is relayed unmodified.
#[derive(Debug, Clone)]
pub struct HttpProxyBackend {
    route_path: String,
    base: Url,
    client: Client,
}

impl HttpProxyBackend {
    pub fn new(route_path: &str, address: &str, client: Client) -> Result<Self, ConfigError> {
        let base = Url::parse(address).map_err(|e| ConfigError::InvalidUpstream {
            route: route_path.to_string(),
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            route_path: route_path.to_string(),
            base,
            client,
        })
    }

    pub fn upstream_url(&self, ctx: &RequestContext) -> Url {
        let mut url = self.base.clone();

        let suffix = ctx.path.strip_prefix(&self.route_path).unwrap_or("");
        if !suffix.is_empty() {
            let joined = format!("{}{}", url.path().trim_end_matches('/'), suffix);
            url.set_path(&joined);
        }

        if let Some(query) = ctx.query.as_deref().filter(|q| !q.is_empty()) {
            let merged = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
                _ => query.to_string(),
            };
            url.set_query(Some(&merged));
        }
        url
    }
}

fn forwarded_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[async_trait]
impl Backend for HttpProxyBackend {
    async fn call(
        &self,
        ctx: &RequestContext,
        _api_key_id: Option<&str>,
    ) -> GatewayResult<BackendResponse> {
        let url = self.upstream_url(ctx);
        debug!(request_id = %ctx.request_id, url = %url, "Forwarding to upstream");

        let upstream = self
            .client
            .request(ctx.method.clone(), url)
            .headers(forwarded_headers(&ctx.headers))
            .body(ctx.body.clone())
            .send()
            .await
            .map_err(|e| classify(&self.base, e))?;

        let status = upstream.status();
        let headers = forwarded_headers(upstream.headers());
        let body = upstream.bytes().await.map_err(|e| classify(&self.base, e))?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    fn describe(&self) -> String {
        format!("http_proxy:{}", self.base)
    }
}

// Deadlines are enforced by the invoker, so every client error here is a
// failure to reach or read from the upstream.
fn classify(base: &Url, err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::BackendUnavailable(format!("upstream {} is unreachable", base))
    } else {
        GatewayError::BackendUnavailable(format!("upstream {} failed: {}", base, err))
    }
}
