//! The access decision function: combines session state, entitlement
//! records and the legacy flag pair into a single verdict. Total over all
//! inputs — every failure class degrades to a defined verdict, nothing
//! propagates to the caller.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::entitlements::{EntitlementError, EntitlementLookup};
use super::flags::{FlagStore, LegacyFlags};
use super::session::{resolve_valid_session, SessionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessReason {
    Authenticated,
    Paid,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessVerdict {
    pub has_access: bool,
    pub reason: AccessReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
}

impl AccessVerdict {
    pub fn denied() -> Self {
        Self { has_access: false, reason: AccessReason::None, user_email: None, subscription_status: None }
    }

    pub fn authenticated(email: String) -> Self {
        Self { has_access: true, reason: AccessReason::Authenticated, user_email: Some(email), subscription_status: None }
    }

    pub fn paid(email: String, status: &str) -> Self {
        Self {
            has_access: true,
            reason: AccessReason::Paid,
            user_email: Some(email),
            subscription_status: Some(status.to_string()),
        }
    }
}

/// Classify the visitor's entitlement to the paid chat feature.
///
/// Priority order, first match wins:
/// 1. session retrieval error -> denied;
/// 2. signed in: entitlement record, then legacy flag matched to the session
///    email, then plain authenticated access;
/// 3. signed out: guest flag pair, else denied.
pub async fn check_user_access<P, E, F>(sessions: &P, entitlements: &E, flags: &F) -> AccessVerdict
where
    P: SessionProvider,
    E: EntitlementLookup,
    F: FlagStore + ?Sized,
{
    let session = match resolve_valid_session(sessions).await {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "access", "session check failed: {e}");
            return AccessVerdict::denied();
        }
    };

    let stored = LegacyFlags::read(flags);

    if let Some(session) = session {
        match entitlements.find_for_user(&session.user_id).await {
            Ok(Some(record)) => {
                let status = if record.subscribed { "active" } else { "inactive" };
                return AccessVerdict {
                    has_access: record.subscribed,
                    reason: AccessReason::Paid,
                    user_email: Some(session.email),
                    subscription_status: Some(status.to_string()),
                };
            }
            Ok(None) => {}
            Err(EntitlementError::Authorization(msg)) => {
                // A permissions fault in the lookup must not lock out a
                // signed-in user.
                warn!(target: "access", "entitlement lookup denied, degrading to authenticated: {msg}");
                return AccessVerdict::authenticated(session.email);
            }
            Err(e) => {
                warn!(target: "access", "entitlement lookup failed, treating as no record: {e}");
            }
        }

        if stored.matches_email(&session.email) {
            return AccessVerdict::paid(session.email, "legacy_paid");
        }

        return AccessVerdict::authenticated(session.email);
    }

    if stored.grants_guest_access() {
        return AccessVerdict {
            has_access: true,
            reason: AccessReason::Paid,
            user_email: stored.paid_user_email,
            subscription_status: Some("guest_paid".to_string()),
        };
    }

    AccessVerdict::denied()
}
