//! Usage-plan quota counters and calendar periods.

use chrono::{DateTime, Datelike, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Quota window. All boundaries are computed in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPeriod {
    #[serde(alias = "DAY")]
    Day,
    #[serde(alias = "WEEK")]
    Week,
    #[serde(alias = "MONTH")]
    Month,
}

impl QuotaPeriod {
    /// Start of the period containing `at`.
    pub fn start_of(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let first_day = match self {
            QuotaPeriod::Day => date,
            QuotaPeriod::Week => {
                date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            QuotaPeriod::Month => date.with_day(1).unwrap_or(date),
        };
        first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// Start of the period following the one containing `at`.
    pub fn next_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start_of(at);
        match self {
            QuotaPeriod::Day => start + chrono::Duration::days(1),
            QuotaPeriod::Week => start + chrono::Duration::weeks(1),
            QuotaPeriod::Month => start
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { remaining: u64 },
    Exceeded { retry_after: Duration },
}

/// Usage count for one (plan, key) within the current period.
#[derive(Debug, Clone)]
pub struct QuotaCounter {
    limit: u64,
    period: QuotaPeriod,
    count: u64,
    period_start: DateTime<Utc>,
}

impl QuotaCounter {
    pub fn new(limit: u64, period: QuotaPeriod, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            period,
            count: 0,
            period_start: period.start_of(now),
        }
    }

    /// Count one request unless the limit is reached. The counter resets
    /// lazily here when `now` falls into a later period than the stored one.
    pub fn try_increment(&mut self, now: DateTime<Utc>) -> QuotaDecision {
        let current = self.period.start_of(now);
        if current != self.period_start {
            self.period_start = current;
            self.count = 0;
        }

        if self.count >= self.limit {
            let reset_at = self.period.next_start(now);
            let retry_after = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
            return QuotaDecision::Exceeded { retry_after };
        }

        self.count += 1;
        QuotaDecision::Allowed {
            remaining: self.limit - self.count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_period_starts() {
        // 2026-10-15 is a Thursday
        let now = at(2026, 10, 15, 17);
        assert_eq!(QuotaPeriod::Day.start_of(now), at(2026, 10, 15, 0));
        assert_eq!(QuotaPeriod::Week.start_of(now), at(2026, 10, 12, 0));
        assert_eq!(QuotaPeriod::Month.start_of(now), at(2026, 10, 1, 0));
    }

    #[test]
    fn test_next_period_start() {
        let now = at(2026, 12, 31, 23);
        assert_eq!(QuotaPeriod::Day.next_start(now), at(2027, 1, 1, 0));
        assert_eq!(QuotaPeriod::Month.next_start(now), at(2027, 1, 1, 0));
        assert_eq!(QuotaPeriod::Week.next_start(now), at(2027, 1, 4, 0));
    }

    #[test]
    fn test_limit_reached_within_period() {
        let now = at(2026, 10, 15, 9);
        let mut counter = QuotaCounter::new(10, QuotaPeriod::Day, now);
        for i in 0..10 {
            assert_eq!(
                counter.try_increment(now),
                QuotaDecision::Allowed { remaining: 9 - i }
            );
        }
        match counter.try_increment(now) {
            QuotaDecision::Exceeded { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(15 * 3600));
            }
            other => panic!("expected quota to be exceeded, got {:?}", other),
        }
        assert_eq!(counter.count(), 10);
    }

    #[test]
    fn test_counter_resets_on_next_period() {
        let now = at(2026, 10, 15, 23);
        let mut counter = QuotaCounter::new(1, QuotaPeriod::Day, now);
        assert!(matches!(counter.try_increment(now), QuotaDecision::Allowed { .. }));
        assert!(matches!(counter.try_increment(now), QuotaDecision::Exceeded { .. }));

        let tomorrow = at(2026, 10, 16, 0);
        assert!(matches!(
            counter.try_increment(tomorrow),
            QuotaDecision::Allowed { remaining: 0 }
        ));
        assert_eq!(counter.period_start(), tomorrow);
    }

    #[test]
    fn test_period_accepts_uppercase_alias() {
        let period: QuotaPeriod = serde_json::from_str("\"DAY\"").unwrap();
        assert_eq!(period, QuotaPeriod::Day);
        let period: QuotaPeriod = serde_json::from_str("\"month\"").unwrap();
        assert_eq!(period, QuotaPeriod::Month);
    }
}
