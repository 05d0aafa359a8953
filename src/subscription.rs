//! Client-side subscription status summary for a signed-in email. A backend
//! outage must never block paying users, so transport failures fail OPEN
//! (access assumed); an explicit non-2xx answer fails closed with an error
//! state instead.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::billing::SubscriptionSummary;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub has_subscription: bool,
    pub subscription: Option<SubscriptionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_expired: bool,
    pub days_until_expiry: Option<i64>,
    pub can_use_unlimited_features: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    #[serde(default)]
    has_subscription: bool,
    #[serde(default)]
    subscription: Option<SubscriptionSummary>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Error)]
enum CheckFailure {
    #[error("subscription check rejected: HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("subscription check transport failure: {0}")]
    Network(String),
}

pub struct SubscriptionChecker {
    endpoint: Url,
    client: reqwest::Client,
}

impl SubscriptionChecker {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid subscription check endpoint")?;
        Ok(Self { endpoint, client: reqwest::Client::new() })
    }

    /// Summarize the subscription state for an email. Never returns an error:
    /// upstream rejections become an explicit error state, transport failures
    /// fail open.
    pub async fn check(&self, email: &str) -> SubscriptionStatus {
        match self.fetch(email).await {
            Ok(resp) => summarize(resp, Utc::now().timestamp()),
            Err(CheckFailure::Upstream { status, message }) => {
                warn!(target: "subscription", "check failed for {email}: HTTP {status}: {message}");
                SubscriptionStatus { error: Some(message), ..SubscriptionStatus::default() }
            }
            Err(CheckFailure::Network(e)) => {
                // Backend unavailable: allow access rather than blocking a
                // possibly-paying user, and surface no error.
                info!(target: "subscription", "backend unavailable ({e}), allowing access as fallback");
                SubscriptionStatus {
                    has_subscription: true,
                    can_use_unlimited_features: true,
                    ..SubscriptionStatus::default()
                }
            }
        }
    }

    async fn fetch(&self, email: &str) -> Result<CheckResponse, CheckFailure> {
        let resp = self
            .client
            .get(self.endpoint.clone())
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| CheckFailure::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<CheckResponse>()
                .await
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "failed to check subscription".to_string());
            return Err(CheckFailure::Upstream { status: status.as_u16(), message });
        }
        resp.json().await.map_err(|e| CheckFailure::Network(e.to_string()))
    }
}

fn summarize(resp: CheckResponse, now: i64) -> SubscriptionStatus {
    let period_end = resp.subscription.as_ref().and_then(|s| s.current_period_end);
    let is_expired = resp.has_subscription && period_end.is_some_and(|end| end < now);
    let days_until_expiry = if resp.has_subscription {
        period_end.map(|end| (end - now + SECS_PER_DAY - 1).div_euclid(SECS_PER_DAY))
    } else {
        None
    };
    SubscriptionStatus {
        has_subscription: resp.has_subscription,
        subscription: resp.subscription,
        error: None,
        is_expired,
        days_until_expiry,
        can_use_unlimited_features: resp.has_subscription && !is_expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(period_end: Option<i64>) -> SubscriptionSummary {
        SubscriptionSummary {
            id: "sub_1".into(),
            status: "active".into(),
            current_period_end: period_end,
            plan: "monthly".into(),
        }
    }

    #[test]
    fn active_subscription_within_period_allows_unlimited_features() {
        let now = 1_000_000;
        let resp = CheckResponse {
            has_subscription: true,
            subscription: Some(summary(Some(now + 10 * SECS_PER_DAY))),
            error: None,
        };
        let status = summarize(resp, now);
        assert!(status.has_subscription);
        assert!(!status.is_expired);
        assert_eq!(status.days_until_expiry, Some(10));
        assert!(status.can_use_unlimited_features);
    }

    #[test]
    fn lapsed_period_end_marks_expired_and_blocks_unlimited_features() {
        let now = 1_000_000;
        let resp = CheckResponse {
            has_subscription: true,
            subscription: Some(summary(Some(now - 1))),
            error: None,
        };
        let status = summarize(resp, now);
        assert!(status.is_expired);
        assert!(!status.can_use_unlimited_features);
    }

    #[test]
    fn no_subscription_has_no_expiry_math() {
        let resp = CheckResponse { has_subscription: false, subscription: None, error: None };
        let status = summarize(resp, 1_000_000);
        assert!(!status.has_subscription);
        assert!(!status.is_expired);
        assert_eq!(status.days_until_expiry, None);
        assert!(!status.can_use_unlimited_features);
    }

    #[test]
    fn partial_day_rounds_up() {
        let now = 1_000_000;
        let resp = CheckResponse {
            has_subscription: true,
            subscription: Some(summary(Some(now + SECS_PER_DAY + 1))),
            error: None,
        };
        assert_eq!(summarize(resp, now).days_until_expiry, Some(2));
    }

    #[tokio::test]
    async fn unreachable_backend_fails_open() {
        // Nothing listens on this port; connection is refused immediately.
        let checker = SubscriptionChecker::new("http://127.0.0.1:9/check-subscription").unwrap();
        let status = checker.check("u1@test.com").await;
        assert!(status.has_subscription);
        assert!(status.can_use_unlimited_features);
        assert!(status.error.is_none());
    }
}
