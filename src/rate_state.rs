use crate::clock::Clock;
use crate::policy::{QuotaSettings, ThrottleSettings};
use crate::quota::{QuotaCounter, QuotaDecision};
use crate::token_bucket::TokenBucket;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Identity of one token bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Stage,
    /// Keyed by route id (`{path}/{VERB}`).
    Method(String),
    Plan { plan: String, key: String },
}

/// Identity of one quota counter. The period lives in the counter itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub plan: String,
    pub key: String,
}

/// Process-lifetime throttle state shared by all requests.
///
/// Each bucket and counter sits behind its own mutex. The map shard is only
/// held long enough to fetch or create the entry, so a caller never holds
/// more than one scope lock at a time.
#[derive(Debug)]
pub struct RateState {
    clock: Arc<dyn Clock>,
    buckets: DashMap<ScopeKey, Arc<Mutex<TokenBucket>>>,
    quotas: DashMap<QuotaKey, Arc<Mutex<QuotaCounter>>>,
}

impl RateState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            buckets: DashMap::new(),
            quotas: DashMap::new(),
        }
    }

    /// Take one token from the scope's bucket, creating a full bucket on first use.
    ///
    /// On rejection returns how long until the bucket holds a token again.
    pub fn try_acquire(&self, scope: ScopeKey, settings: ThrottleSettings) -> Result<(), Duration> {
        let bucket = self.bucket(scope, settings);
        let now = self.clock.now();
        let mut bucket = bucket.lock();
        if bucket.try_consume(1, now) {
            return Ok(());
        }
        let wait = bucket.time_until_available(1, now).unwrap_or(Duration::ZERO);
        Err(wait)
    }

    /// Count one request against the key's quota for the current period.
    pub fn try_count(&self, key: QuotaKey, settings: QuotaSettings) -> QuotaDecision {
        let counter = self.counter(key, settings);
        let now = self.clock.utc_now();
        let decision = counter.lock().try_increment(now);
        decision
    }

    pub fn available_tokens(&self, scope: &ScopeKey) -> Option<u32> {
        let bucket = self.buckets.get(scope).map(|b| Arc::clone(b.value()))?;
        let now = self.clock.now();
        let available = bucket.lock().available_tokens(now);
        Some(available)
    }

    pub fn quota_used(&self, key: &QuotaKey) -> Option<u64> {
        let counter = self.quotas.get(key).map(|c| Arc::clone(c.value()))?;
        let used = counter.lock().count();
        Some(used)
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn tracked_quotas(&self) -> usize {
        self.quotas.len()
    }

    fn bucket(&self, scope: ScopeKey, settings: ThrottleSettings) -> Arc<Mutex<TokenBucket>> {
        if let Some(existing) = self.buckets.get(&scope) {
            return Arc::clone(existing.value());
        }

        let now = self.clock.now();
        let entry = self.buckets.entry(scope).or_insert_with(|| {
            Arc::new(Mutex::new(TokenBucket::new(
                settings.burst_limit,
                settings.rate_limit,
                now,
            )))
        });
        Arc::clone(entry.value())
    }

    fn counter(&self, key: QuotaKey, settings: QuotaSettings) -> Arc<Mutex<QuotaCounter>> {
        if let Some(existing) = self.quotas.get(&key) {
            return Arc::clone(existing.value());
        }

        let now = self.clock.utc_now();
        let entry = self.quotas.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(QuotaCounter::new(
                settings.limit,
                settings.period_unit,
                now,
            )))
        });
        Arc::clone(entry.value())
    }
}
