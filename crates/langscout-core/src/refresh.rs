use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{Domain, ResponseState};

/// When a visited domain becomes eligible for the error-retry tier again.
///
/// - `Ok`, `NotFound`: never (terminal)
/// - `Error` after a DNS failure: `dns_error_refresh` (14 days)
/// - any other `Error`: `domain_error_refresh` (72h)
/// - `Banned`: `ban_refresh` (72h)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub domain_error_refresh: TimeDelta,
    pub dns_error_refresh: TimeDelta,
    pub ban_refresh: TimeDelta,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            domain_error_refresh: TimeDelta::hours(72),
            dns_error_refresh: TimeDelta::hours(336),
            ban_refresh: TimeDelta::hours(72),
        }
    }
}

impl RefreshPolicy {
    /// Next due time for a domain after a visit, `None` if it leaves the queue.
    pub fn next_due(
        &self,
        domain: &Domain,
        dns_failure: bool,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match domain.response_state {
            ResponseState::Ok | ResponseState::NotFound => None,
            ResponseState::Error if dns_failure => Some(now + self.dns_error_refresh),
            ResponseState::Error => Some(now + self.domain_error_refresh),
            ResponseState::Banned => Some(now + self.ban_refresh),
            // A visit always leaves a verdict; an unvisited domain goes straight back.
            ResponseState::Unvisited => Some(now),
        }
    }
}
