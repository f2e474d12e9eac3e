use crate::error::{GatewayError, GatewayResult, ThrottleScope};
use crate::policy::ThrottleSettings;
use crate::policy_store::{RouteEntry, UsagePlan};
use crate::quota::QuotaDecision;
use crate::rate_state::{QuotaKey, RateState, ScopeKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Evaluates the throttle hierarchy for one request.
///
/// Layers run in a fixed order (stage, method, plan, quota) and the first
/// rejection wins; later layers are not touched.
#[derive(Debug, Clone)]
pub struct ThrottleEngine {
    state: Arc<RateState>,
    stage: ThrottleSettings,
}

impl ThrottleEngine {
    pub fn new(state: Arc<RateState>, stage: ThrottleSettings) -> Self {
        Self { state, stage }
    }

    /// `plan` is `None` for routes that do not require an API key; those skip
    /// the plan bucket and the quota.
    pub fn check(&self, route: &RouteEntry, plan: Option<(&UsagePlan, &str)>) -> GatewayResult<()> {
        self.state
            .try_acquire(ScopeKey::Stage, self.stage)
            .map_err(|wait| self.reject(ThrottleScope::Stage, &route.id, wait))?;

        self.state
            .try_acquire(ScopeKey::Method(route.id.clone()), route.throttle)
            .map_err(|wait| self.reject(ThrottleScope::Method, &route.id, wait))?;

        let Some((plan, key_id)) = plan else {
            return Ok(());
        };

        let plan_scope = ScopeKey::Plan {
            plan: plan.name.clone(),
            key: key_id.to_string(),
        };
        self.state
            .try_acquire(plan_scope, plan.throttle)
            .map_err(|wait| self.reject(ThrottleScope::Plan, &route.id, wait))?;

        let quota_key = QuotaKey {
            plan: plan.name.clone(),
            key: key_id.to_string(),
        };
        match self.state.try_count(quota_key, plan.quota) {
            QuotaDecision::Allowed { remaining } => {
                debug!(plan = %plan.name, api_key_id = key_id, remaining, "Quota counted");
                Ok(())
            }
            QuotaDecision::Exceeded { retry_after } => {
                debug!(plan = %plan.name, api_key_id = key_id, "Quota exhausted");
                Err(GatewayError::QuotaExceeded {
                    plan: plan.name.clone(),
                    retry_after,
                })
            }
        }
    }

    pub fn state(&self) -> &Arc<RateState> {
        &self.state
    }

    fn reject(&self, scope: ThrottleScope, route_id: &str, retry_after: Duration) -> GatewayError {
        debug!(
            scope = scope.as_str(),
            route = route_id,
            retry_after_ms = retry_after.as_millis() as u64,
            "Request throttled"
        );
        GatewayError::Throttled { scope, retry_after }
    }
}
