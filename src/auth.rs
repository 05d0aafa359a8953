//! Thin client for the external session store. Holds the ambient session the
//! way the provider's own SDK would; implements `SessionProvider` so the
//! access policy can consult it through the trait seam.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::access::{clear_payment_flags, FlagStore, Session, SessionProvider};

pub struct AuthClient {
    base: Url,
    anon_key: String,
    client: reqwest::Client,
    session: RwLock<Option<Session>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        Session {
            user_id: self.user.id,
            email: self.user.email.unwrap_or_default(),
            expires_at,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
        }
    }
}

impl AuthClient {
    pub fn new(base: &str, anon_key: &str) -> Result<Self> {
        let base = Url::parse(base).context("invalid auth provider base URL")?;
        Ok(Self {
            base,
            anon_key: anon_key.to_string(),
            client: reqwest::Client::new(),
            session: RwLock::new(None),
        })
    }

    async fn token_request(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let mut url = self.base.join("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .context("auth service unreachable")?;
        let status = resp.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(anyhow!("invalid email or password"));
        }
        if !status.is_success() {
            return Err(anyhow!("auth service error: HTTP {status}"));
        }
        let token: TokenResponse = resp.json().await.context("auth service returned invalid payload")?;
        let session = token.into_session();
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.token_request("password", json!({"email": email, "password": password}))
            .await
    }

    pub async fn sign_up(&self, email: &str, password: &str, full_name: Option<&str>) -> Result<Session> {
        let url = self.base.join("/auth/v1/signup")?;
        let body = json!({
            "email": email,
            "password": password,
            "data": { "full_name": full_name.unwrap_or(email) },
        });
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .context("auth service unreachable")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("signup failed: HTTP {status}"));
        }
        let token: TokenResponse = resp.json().await.context("auth service returned invalid payload")?;
        let session = token.into_session();
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    /// Revoke the session and clear the legacy payment flags. Revocation is
    /// best-effort; the local state is cleared either way.
    pub async fn sign_out<F: FlagStore + ?Sized>(&self, flags: &F) {
        let current = self.session.write().take();
        if let Some(session) = current {
            let result = async {
                let url = self.base.join("/auth/v1/logout")?;
                let resp = self
                    .client
                    .post(url)
                    .header("apikey", &self.anon_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(anyhow!("logout rejected: HTTP {}", resp.status()));
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;
            if let Err(e) = result {
                warn!(target: "auth", "sign-out revocation failed: {e}");
            }
        }
        clear_payment_flags(flags);
    }
}

impl SessionProvider for AuthClient {
    async fn current(&self) -> Result<Option<Session>> {
        Ok(self.session.read().clone())
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return Err(anyhow!("session has no refresh token"));
        };
        self.token_request("refresh_token", json!({"refresh_token": refresh_token}))
            .await
    }
}
