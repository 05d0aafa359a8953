//! Entitlement record lookup against the persistent subscriptions table.
//! Read-only to this policy; at most one record is consulted per identity.

use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitlementRecord {
    pub user_id: String,
    pub subscribed: bool,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum EntitlementError {
    /// The store rejected the query itself (expired credential, missing
    /// grant). Distinct from transport failure: the decision function fails
    /// open for signed-in users on this class only.
    #[error("entitlement lookup rejected: {0}")]
    Authorization(String),
    #[error("entitlement transport failure: {0}")]
    Transport(String),
    #[error("malformed entitlement payload: {0}")]
    Malformed(String),
}

#[allow(async_fn_in_trait)]
pub trait EntitlementLookup: Send + Sync {
    /// First matching record for the identity, or `None` when the table has
    /// no row for it.
    async fn find_for_user(&self, user_id: &str) -> Result<Option<EntitlementRecord>, EntitlementError>;
}

/// Lookup against the data API's REST surface: query by identity, filter
/// subscribed rows, limit 1.
pub struct RestEntitlementLookup {
    base: Url,
    api_key: String,
    client: reqwest::Client,
}

impl RestEntitlementLookup {
    pub fn new(base: &str, api_key: &str) -> Result<Self> {
        let base = Url::parse(base).context("invalid entitlement API base URL")?;
        Ok(Self { base, api_key: api_key.to_string(), client: reqwest::Client::new() })
    }
}

impl EntitlementLookup for RestEntitlementLookup {
    async fn find_for_user(&self, user_id: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        let url = self
            .base
            .join("/rest/v1/subscriptions")
            .map_err(|e| EntitlementError::Transport(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("subscribed", "eq.true".to_string()),
                ("limit", "1".to_string()),
            ])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| EntitlementError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EntitlementError::Authorization(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(EntitlementError::Transport(format!("HTTP {status}")));
        }

        let rows: Vec<EntitlementRecord> = resp
            .json()
            .await
            .map_err(|e| EntitlementError::Malformed(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}
