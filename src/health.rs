use crate::gateway::Gateway;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub policy: PolicySummary,
    pub rate_state: RateStateSummary,
    pub backends: BackendSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicySummary {
    pub routes: usize,
    pub api_keys: usize,
    pub usage_plans: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateStateSummary {
    pub tracked_buckets: usize,
    pub tracked_quotas: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendSummary {
    pub in_flight: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub status: String,
}

pub struct HealthChecker<'a> {
    gateway: &'a Gateway,
}

impl<'a> HealthChecker<'a> {
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    pub fn check_health(&self) -> HealthStatus {
        let store = self.gateway.store();
        let state = self.gateway.rate_state();
        let invoker = self.gateway.invoker();

        // Saturation is reported but the process is still serving.
        let status = if invoker.in_flight() < invoker.max_concurrent() {
            "healthy"
        } else {
            "degraded"
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.gateway.started_at().elapsed().as_secs(),
            policy: PolicySummary {
                routes: store.routes().len(),
                api_keys: store.api_key_count(),
                usage_plans: store.plan_count(),
            },
            rate_state: RateStateSummary {
                tracked_buckets: state.tracked_buckets(),
                tracked_quotas: state.tracked_quotas(),
            },
            backends: BackendSummary {
                in_flight: invoker.in_flight(),
                max_concurrent: invoker.max_concurrent(),
            },
        }
    }

    /// Ready once a policy with at least one route is loaded.
    pub fn check_ready(&self) -> ReadinessStatus {
        let ready = !self.gateway.store().routes().is_empty();
        ReadinessStatus {
            ready,
            status: if ready { "ready" } else { "not_ready" }.to_string(),
        }
    }
}
