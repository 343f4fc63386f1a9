//! Sliding-window request gate shared by every externally reachable endpoint.
//!
//! Entries are rows in `rate_limit_log`; a request is admitted while fewer than
//! `max_requests` entries exist for the same identifier and endpoint in the
//! trailing window. Storage failures fail open.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::RateLimitRule;
use crate::errors::AppError;
use crate::store::CrmStore;

/// Windows longer than a year are clamped.
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole seconds until the oldest entry leaves the window. Set only when
    /// the request was rejected.
    pub retry_after_secs: Option<u64>,
    /// Requests left in the window after this one.
    pub remaining: u32,
}

impl RateLimitDecision {
    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
            remaining,
        }
    }
}

/// Decides a request given the entries already inside the window.
///
/// `count` is the number of entries with timestamp >= `now - window` and
/// `oldest` the earliest of them.
pub fn evaluate_window(
    count: u64,
    oldest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_requests: u32,
    window_secs: u64,
) -> RateLimitDecision {
    let max = u64::from(max_requests);
    if count < max {
        let remaining = (max - count - 1).min(u64::from(u32::MAX)) as u32;
        return RateLimitDecision::allow(remaining);
    }

    let window_secs = window_secs.min(MAX_WINDOW_SECS);
    let window = Duration::seconds(window_secs as i64);
    let retry = oldest
        .map(|oldest| (oldest + window - now).num_seconds())
        .unwrap_or(window_secs as i64)
        .max(1) as u64;

    RateLimitDecision {
        allowed: false,
        retry_after_secs: Some(retry),
        remaining: 0,
    }
}

/// Identifier/endpoint pair being limited.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitKey<'a> {
    pub identifier: &'a str,
    pub endpoint: &'a str,
}

/// Store-backed sliding-window limiter.
pub struct RateLimiter<'a> {
    store: &'a dyn CrmStore,
}

impl<'a> RateLimiter<'a> {
    pub fn new(store: &'a dyn CrmStore) -> Self {
        Self { store }
    }

    /// Checks and records one request. Never fails: storage errors admit the
    /// request.
    pub async fn check(
        &self,
        key: RateLimitKey<'_>,
        max_requests: u32,
        window_secs: u64,
    ) -> RateLimitDecision {
        match self
            .store
            .admit_request(key.identifier, key.endpoint, max_requests, window_secs, Utc::now())
            .await
        {
            Ok(decision) => {
                if !decision.allowed {
                    tracing::warn!(
                        "Rate limit exceeded: identifier={}, endpoint={}, retry_after={:?}",
                        key.identifier,
                        key.endpoint,
                        decision.retry_after_secs
                    );
                }
                decision
            }
            Err(e) => {
                tracing::warn!(
                    "Rate limiter storage error for {}:{}, failing open: {}",
                    key.identifier,
                    key.endpoint,
                    e
                );
                RateLimitDecision::allow(max_requests.saturating_sub(1))
            }
        }
    }

    /// Like [`check`](Self::check) but maps a rejection to `AppError::RateLimited`.
    pub async fn enforce(&self, key: RateLimitKey<'_>, rule: RateLimitRule) -> Result<(), AppError> {
        let decision = self.check(key, rule.max_requests, rule.window_secs).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(rule.window_secs),
            })
        }
    }
}
