use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::refresh::RefreshPolicy;

/// Consecutive claim failures tolerated before the scheduler stops.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Runtime settings for the crawl subsystem.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Concurrent leases allowed per proxy, and for the direct lane.
    pub threads_per_proxy: usize,
    /// Global concurrency budget; `max_threads - 1` worker slots are handed out.
    pub max_threads: usize,
    /// Share of worker slots (percent) the error-retry tier may occupy.
    pub max_bad_domain_share: u8,
    pub response_timeout: Duration,
    /// How often the proxy pool is reloaded from the registry.
    pub dead_proxy_refresh: Duration,
    pub refresh: RefreshPolicy,
    /// Sleep between claims when no tier has work.
    pub poll_interval: Duration,
    /// Sleep after a claim that found every lease taken.
    pub lease_backoff: Duration,
    pub batch_lifetime: TimeDelta,
    pub sweep_interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            threads_per_proxy: 10,
            max_threads: 100,
            max_bad_domain_share: 60,
            response_timeout: Duration::from_secs(15),
            dead_proxy_refresh: Duration::from_secs(70 * 60),
            refresh: RefreshPolicy::default(),
            poll_interval: Duration::from_secs(1),
            lease_backoff: Duration::from_millis(500),
            batch_lifetime: TimeDelta::hours(72),
            sweep_interval: Duration::from_secs(60 * 60),
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl CrawlConfig {
    /// Read configuration from `LANGSCOUT_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let threads_per_proxy = parse_var(&lookup, "LANGSCOUT_THREADS_PER_PROXY")?
            .unwrap_or(defaults.threads_per_proxy);
        let max_threads =
            parse_var(&lookup, "LANGSCOUT_MAX_THREADS")?.unwrap_or(defaults.max_threads);
        let max_bad_domain_share = parse_var(&lookup, "LANGSCOUT_MAX_BAD_DOMAIN_SHARE")?
            .unwrap_or(defaults.max_bad_domain_share);

        let response_timeout = parse_var::<u64, _>(&lookup, "LANGSCOUT_RESPONSE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.response_timeout);
        let dead_proxy_refresh =
            parse_var::<u64, _>(&lookup, "LANGSCOUT_DEAD_PROXY_REFRESH_MINS")?
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.dead_proxy_refresh);
        let poll_interval = parse_var::<u64, _>(&lookup, "LANGSCOUT_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let refresh = RefreshPolicy {
            domain_error_refresh: parse_hours(&lookup, "LANGSCOUT_DOMAIN_ERROR_REFRESH_HOURS")?
                .unwrap_or(defaults.refresh.domain_error_refresh),
            dns_error_refresh: parse_hours(&lookup, "LANGSCOUT_DNS_ERROR_REFRESH_HOURS")?
                .unwrap_or(defaults.refresh.dns_error_refresh),
            ban_refresh: parse_hours(&lookup, "LANGSCOUT_BAN_REFRESH_HOURS")?
                .unwrap_or(defaults.refresh.ban_refresh),
        };
        let batch_lifetime = parse_hours(&lookup, "LANGSCOUT_BATCH_LIFETIME_HOURS")?
            .unwrap_or(defaults.batch_lifetime);

        let config = Self {
            threads_per_proxy,
            max_threads,
            max_bad_domain_share,
            response_timeout,
            dead_proxy_refresh,
            refresh,
            poll_interval,
            batch_lifetime,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.threads_per_proxy == 0 {
            return Err(AppError::ConfigError(
                "LANGSCOUT_THREADS_PER_PROXY must be at least 1".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(AppError::ConfigError(
                "LANGSCOUT_MAX_THREADS must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.max_bad_domain_share) {
            return Err(AppError::ConfigError(
                "LANGSCOUT_MAX_BAD_DOMAIN_SHARE must be between 1 and 100".into(),
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "LANGSCOUT_RESPONSE_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Worker slots handed out by the scheduler.
    pub fn worker_slots(&self) -> usize {
        self.max_threads.saturating_sub(1).max(1)
    }

    /// Worker slots the error-retry tier may hold at once.
    pub fn error_tier_slots(&self) -> usize {
        (self.worker_slots() * self.max_bad_domain_share as usize / 100).max(1)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
        }),
    }
}

fn parse_hours<F>(lookup: &F, key: &str) -> Result<Option<TimeDelta>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<i64, _>(lookup, key)?.map(TimeDelta::hours))
}
