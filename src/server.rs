use crate::gateway::Gateway;
use crate::health::HealthChecker;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub type SharedGateway = Arc<Gateway>;

/// Build the HTTP app. `/_gateway/*` is answered here; everything else goes
/// through the admission pipeline.
pub fn create_app(gateway: SharedGateway) -> Router {
    Router::new()
        .route("/_gateway/health", get(health_check))
        .route("/_gateway/ready", get(readiness_check))
        .fallback(gateway_handler)
        .with_state(gateway)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn gateway_handler(State(gateway): State<SharedGateway>, request: Request) -> Response {
    gateway.handle(request).await
}

async fn health_check(State(gateway): State<SharedGateway>) -> impl IntoResponse {
    Json(HealthChecker::new(&gateway).check_health())
}

async fn readiness_check(State(gateway): State<SharedGateway>) -> impl IntoResponse {
    let readiness = HealthChecker::new(&gateway).check_ready();
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(bind_addr: SocketAddr, gateway: SharedGateway) -> Self {
        Self {
            app: create_app(gateway),
            bind_addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Gateway listening on {}", listener.local_addr()?);
        tracing::info!("Health check available at /_gateway/health");
        tracing::info!("Readiness check available at /_gateway/ready");

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
