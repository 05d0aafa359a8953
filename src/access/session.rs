//! Session resolution against the external session store. The provider is a
//! trait seam so the decision function can be exercised without a live auth
//! backend.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::tprintln;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    /// Unix seconds after which the access token is no longer valid.
    pub expires_at: i64,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[allow(async_fn_in_trait)]
pub trait SessionProvider: Send + Sync {
    /// Read the ambient session without judging its freshness. `Ok(None)`
    /// means signed out; `Err` means the retrieval itself failed.
    async fn current(&self) -> Result<Option<Session>>;

    /// Exchange the session's refresh token for a fresh session.
    async fn refresh(&self, session: &Session) -> Result<Session>;
}

/// Resolve the current session, refreshing an expired one exactly once.
/// A failed refresh is treated as signed-out, never retried.
pub async fn resolve_valid_session<P: SessionProvider>(provider: &P) -> Result<Option<Session>> {
    let Some(session) = provider.current().await? else {
        return Ok(None);
    };
    let now = Utc::now().timestamp();
    if !session.is_expired_at(now) {
        return Ok(Some(session));
    }
    tprintln!("session.expired user={} expires_at={} now={}", session.user_id, session.expires_at, now);
    match provider.refresh(&session).await {
        Ok(fresh) => Ok(Some(fresh)),
        Err(e) => {
            tracing::debug!(target: "access", "session refresh failed: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn session_expiring_at(expires_at: i64) -> Session {
        Session {
            user_id: "u1".into(),
            email: "u1@test.com".into(),
            expires_at,
            access_token: "tok".into(),
            refresh_token: Some("refresh".into()),
        }
    }

    struct CountingProvider {
        session: Session,
        refreshed: AtomicUsize,
        refresh_ok: bool,
    }

    impl SessionProvider for CountingProvider {
        async fn current(&self) -> Result<Option<Session>> {
            Ok(Some(self.session.clone()))
        }

        async fn refresh(&self, session: &Session) -> Result<Session> {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok(Session { expires_at: Utc::now().timestamp() + 3600, ..session.clone() })
            } else {
                anyhow::bail!("refresh rejected")
            }
        }
    }

    #[tokio::test]
    async fn fresh_session_is_returned_without_refresh() {
        let provider = CountingProvider {
            session: session_expiring_at(Utc::now().timestamp() + 600),
            refreshed: AtomicUsize::new(0),
            refresh_ok: true,
        };
        let resolved = resolve_valid_session(&provider).await.unwrap();
        assert!(resolved.is_some());
        assert_eq!(provider.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_session_triggers_exactly_one_refresh() {
        let provider = CountingProvider {
            session: session_expiring_at(Utc::now().timestamp() - 100),
            refreshed: AtomicUsize::new(0),
            refresh_ok: true,
        };
        let resolved = resolve_valid_session(&provider).await.unwrap();
        assert!(resolved.is_some());
        assert_eq!(provider.refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_resolves_to_signed_out() {
        let provider = CountingProvider {
            session: session_expiring_at(Utc::now().timestamp() - 100),
            refreshed: AtomicUsize::new(0),
            refresh_ok: false,
        };
        let resolved = resolve_valid_session(&provider).await.unwrap();
        assert!(resolved.is_none());
        assert_eq!(provider.refreshed.load(Ordering::SeqCst), 1);
    }
}
