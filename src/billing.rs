//! Billing relay: a thin typed wrapper over the billing provider's REST API
//! (customers, payment methods, subscriptions) plus webhook signature
//! verification and event dispatch. No retries; errors propagate to the
//! relay handlers.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Header carrying the `t=...,v1=...` webhook signature scheme.
pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum accepted skew between the signature timestamp and the clock.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct PlanPrices {
    pub weekly: String,
    pub monthly: String,
}

impl PlanPrices {
    pub fn price_for(&self, plan: &str) -> Option<&str> {
        match plan {
            "weekly" => Some(&self.weekly),
            "monthly" => Some(&self.monthly),
            _ => None,
        }
    }
}

/// Relay request body for subscription creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscription {
    pub email: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub plan: String,
    pub payment_method_id: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCreated {
    pub success: bool,
    pub subscription_id: String,
    pub customer_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<i64>,
    pub plan: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    pub plan: String,
}

#[derive(Debug, Default, Deserialize)]
struct Customer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct Subscription {
    id: String,
    status: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

pub struct BillingClient {
    base: Url,
    secret_key: String,
    prices: PlanPrices,
    client: reqwest::Client,
}

impl BillingClient {
    pub fn new(base: &str, secret_key: &str, prices: PlanPrices) -> Result<Self> {
        let base = Url::parse(base).context("invalid billing API base URL")?;
        Ok(Self { base, secret_key: secret_key.to_string(), prices, client: reqwest::Client::new() })
    }

    pub fn prices(&self) -> &PlanPrices {
        &self.prices
    }

    async fn find_customer(&self, email: &str) -> Result<Option<Customer>> {
        let url = self.base.join("/v1/customers")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "customer lookup").await);
        }
        let list: ObjectList<Customer> = resp.json().await.context("customer list payload")?;
        Ok(list.data.into_iter().next())
    }

    async fn create_customer(&self, email: &str, user_id: Option<&str>) -> Result<Customer> {
        let url = self.base.join("/v1/customers")?;
        let params = [
            ("email", email.to_string()),
            ("metadata[userId]", user_id.unwrap_or("no-user-id").to_string()),
        ];
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "customer create").await);
        }
        resp.json().await.context("customer payload")
    }

    async fn attach_payment_method(&self, payment_method_id: &str, customer_id: &str) -> Result<()> {
        let url = self
            .base
            .join(&format!("/v1/payment_methods/{payment_method_id}/attach"))?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .form(&[("customer", customer_id)])
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "payment method attach").await);
        }
        Ok(())
    }

    async fn set_default_payment_method(&self, customer_id: &str, payment_method_id: &str) -> Result<()> {
        let url = self.base.join(&format!("/v1/customers/{customer_id}"))?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .form(&[("invoice_settings[default_payment_method]", payment_method_id)])
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "default payment method update").await);
        }
        Ok(())
    }

    /// Find-or-create the customer, attach and default the payment method,
    /// then create the subscription on the plan's price.
    pub async fn create_subscription(&self, req: &CreateSubscription) -> Result<SubscriptionCreated> {
        let Some(price) = self.prices.price_for(&req.plan) else {
            return Err(anyhow!("unknown plan: {}", req.plan));
        };

        let customer = match self.find_customer(&req.email).await? {
            Some(c) => {
                info!(target: "billing", "found existing customer: {}", c.id);
                c
            }
            None => {
                let c = self.create_customer(&req.email, req.user_id.as_deref()).await?;
                info!(target: "billing", "created new customer: {}", c.id);
                c
            }
        };

        self.attach_payment_method(&req.payment_method_id, &customer.id).await?;
        self.set_default_payment_method(&customer.id, &req.payment_method_id).await?;

        let mut params: Vec<(&str, String)> = vec![
            ("customer", customer.id.clone()),
            ("items[0][price]", price.to_string()),
            ("payment_behavior", "default_incomplete".to_string()),
            ("payment_settings[save_default_payment_method]", "on_subscription".to_string()),
            ("expand[]", "latest_invoice.payment_intent".to_string()),
            ("metadata[userId]", req.user_id.clone().unwrap_or_else(|| "no-user-id".to_string())),
            ("metadata[plan]", req.plan.clone()),
            ("metadata[email]", req.email.clone()),
        ];
        if let Some(coupon) = req.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            params.push(("coupon", coupon.to_string()));
        }

        let url = self.base.join("/v1/subscriptions")?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .form(&params)
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "subscription create").await);
        }
        let sub: Subscription = resp.json().await.context("subscription payload")?;
        info!(target: "billing", "subscription created: {}", sub.id);

        Ok(SubscriptionCreated {
            success: true,
            subscription_id: sub.id,
            customer_id: customer.id,
            status: sub.status,
            current_period_end: sub.current_period_end,
            plan: req.plan.clone(),
        })
    }

    /// Active subscription summary for an email, or `None` when the customer
    /// is unknown or has no active subscription.
    pub async fn check_subscription(&self, email: &str) -> Result<Option<SubscriptionSummary>> {
        let Some(customer) = self.find_customer(email).await? else {
            return Ok(None);
        };
        let url = self.base.join("/v1/subscriptions")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .query(&[("customer", customer.id.as_str()), ("status", "active"), ("limit", "1")])
            .send()
            .await
            .context("billing API unreachable")?;
        if !resp.status().is_success() {
            return Err(billing_error(resp, "subscription lookup").await);
        }
        let list: ObjectList<Subscription> = resp.json().await.context("subscription list payload")?;
        Ok(list.data.into_iter().next().map(|s| SubscriptionSummary {
            id: s.id,
            status: s.status,
            current_period_end: s.current_period_end,
            plan: s.metadata.get("plan").cloned().unwrap_or_else(|| "unknown".to_string()),
        }))
    }
}

async fn billing_error(resp: reqwest::Response, what: &str) -> anyhow::Error {
    let status = resp.status();
    let detail = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();
    if detail.is_empty() {
        anyhow!("{what} failed: HTTP {status}")
    } else {
        anyhow!("{what} failed: {detail}")
    }
}

// --- Webhook signature verification and event dispatch ---

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    BadSignature,
}

type HmacSha256 = Hmac<Sha256>;

/// Produce a `t=...,v1=...` signature header for a payload. Used by tests and
/// local tooling to exercise the webhook receiver.
pub fn sign_webhook_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Verify an incoming webhook signature: parse the header, bound the
/// timestamp skew, then compare HMAC-SHA256 over `"{t}.{payload}"` in
/// constant time against every presented `v1` candidate.
pub fn verify_webhook_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        let Some((k, v)) = part.trim().split_once('=') else { continue };
        match k {
            "t" => timestamp = v.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(v) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        return Err(WebhookError::MalformedHeader);
    };
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::StaleTimestamp);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::BadSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();
    for candidate in &candidates {
        if bool::from(expected.as_slice().ct_eq(candidate.as_slice())) {
            return Ok(());
        }
    }
    Err(WebhookError::BadSignature)
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: WebhookEventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEventData {
    #[serde(default)]
    pub object: serde_json::Value,
}

/// Fire-and-forget handling by event type. The subscription table itself is
/// maintained by the billing-event handler upstream; this receiver only logs.
pub fn dispatch_webhook_event(event: &WebhookEvent) {
    let object_id = event.data.object.get("id").and_then(|v| v.as_str()).unwrap_or("<unknown>");
    match event.kind.as_str() {
        "customer.subscription.created" => info!(target: "billing", "subscription created: {object_id}"),
        "customer.subscription.updated" => info!(target: "billing", "subscription updated: {object_id}"),
        "customer.subscription.deleted" => info!(target: "billing", "subscription cancelled: {object_id}"),
        "invoice.payment_succeeded" => {
            let sub = event.data.object.get("subscription").and_then(|v| v.as_str()).unwrap_or("<unknown>");
            info!(target: "billing", "payment succeeded for subscription: {sub}");
        }
        "invoice.payment_failed" => {
            let sub = event.data.object.get("subscription").and_then(|v| v.as_str()).unwrap_or("<unknown>");
            warn!(target: "billing", "payment failed for subscription: {sub}");
        }
        other => info!(target: "billing", "unhandled webhook event type: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now().timestamp();
        let payload = br#"{"type":"customer.subscription.created","data":{"object":{"id":"sub_1"}}}"#;
        let header = sign_webhook_payload(SECRET, now, payload);
        assert_eq!(verify_webhook_signature(SECRET, &header, payload, now, DEFAULT_TOLERANCE_SECS), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = Utc::now().timestamp();
        let header = sign_webhook_payload(SECRET, now, b"original");
        assert_eq!(
            verify_webhook_signature(SECRET, &header, b"tampered", now, DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::BadSignature)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now().timestamp();
        let header = sign_webhook_payload("whsec_other", now, b"payload");
        assert_eq!(
            verify_webhook_signature(SECRET, &header, b"payload", now, DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::BadSignature)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = Utc::now().timestamp();
        let header = sign_webhook_payload(SECRET, now - DEFAULT_TOLERANCE_SECS - 1, b"payload");
        assert_eq!(
            verify_webhook_signature(SECRET, &header, b"payload", now, DEFAULT_TOLERANCE_SECS),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn malformed_header_is_rejected() {
        let now = Utc::now().timestamp();
        for header in ["", "garbage", "t=notanumber,v1=00", "v1=00", "t=123"] {
            assert_eq!(
                verify_webhook_signature(SECRET, header, b"payload", now, DEFAULT_TOLERANCE_SECS),
                Err(WebhookError::MalformedHeader),
                "header: {header}"
            );
        }
    }

    #[test]
    fn any_matching_v1_candidate_verifies() {
        let now = Utc::now().timestamp();
        let header = sign_webhook_payload(SECRET, now, b"payload");
        let with_decoy = format!("{header},v1=deadbeef");
        assert_eq!(verify_webhook_signature(SECRET, &with_decoy, b"payload", now, DEFAULT_TOLERANCE_SECS), Ok(()));
    }

    #[test]
    fn event_payload_parses_and_dispatches() {
        let body = br#"{"type":"invoice.payment_failed","data":{"object":{"id":"in_1","subscription":"sub_9"}}}"#;
        let event: WebhookEvent = serde_json::from_slice(body).unwrap();
        assert_eq!(event.kind, "invoice.payment_failed");
        // Unknown types must not panic either.
        let unknown: WebhookEvent = serde_json::from_slice(br#"{"type":"charge.refunded"}"#).unwrap();
        dispatch_webhook_event(&event);
        dispatch_webhook_event(&unknown);
    }

    #[test]
    fn plan_prices_map_known_plans_only() {
        let prices = PlanPrices { weekly: "price_w".into(), monthly: "price_m".into() };
        assert_eq!(prices.price_for("weekly"), Some("price_w"));
        assert_eq!(prices.price_for("monthly"), Some("price_m"));
        assert_eq!(prices.price_for("yearly"), None);
    }
}
