//!
//! chatgate HTTP server
//! --------------------
//! This module defines the Axum-based HTTP surface for chatgate.
//!
//! Responsibilities:
//! - Server-side access re-check for untrusted in-app browsers
//!   (`/api/check-access`, trusting only the echoed flag headers).
//! - Billing relay endpoints delegating to the billing client
//!   (`/create-subscription`, `/check-subscription`).
//! - Signature-verified webhook receiver (`/webhook`).
//! - Chat proxy to the remote answering service (`/api/chat`).
//! - Health probe on `/`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::billing::{
    dispatch_webhook_event, verify_webhook_signature, BillingClient, CreateSubscription, PlanPrices,
    WebhookEvent, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER,
};
use crate::chat::ChatClient;
use crate::error::AppError;

/// Client-echoed flag headers consumed by the access re-check.
pub const PAYMENT_SUCCESS_HEADER: &str = "x-payment-success";
pub const PAID_EMAIL_HEADER: &str = "x-paid-user-email";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub billing_api_base: String,
    pub billing_secret_key: String,
    pub webhook_secret: String,
    pub weekly_price_id: String,
    pub monthly_price_id: String,
    pub chat_endpoint: String,
}

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingClient>,
    pub chat: Arc<ChatClient>,
    pub webhook_secret: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "chatgate ok" }))
        .route("/api/check-access", get(check_access))
        .route("/api/chat", post(chat_proxy))
        .route("/create-subscription", post(create_subscription))
        .route("/check-subscription", get(check_subscription))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Start the chatgate HTTP server bound to the configured port.
pub async fn run_with_config(cfg: ServerConfig) -> anyhow::Result<()> {
    let prices = PlanPrices { weekly: cfg.weekly_price_id.clone(), monthly: cfg.monthly_price_id.clone() };
    let billing = BillingClient::new(&cfg.billing_api_base, &cfg.billing_secret_key, prices)?;
    let chat = ChatClient::new(&cfg.chat_endpoint)?;
    let state = AppState {
        billing: Arc::new(billing),
        chat: Arc::new(chat),
        webhook_secret: cfg.webhook_secret.clone(),
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Server-side re-validation of the client's legacy flag pair. The client
/// echoes its stored values as headers; only this answer is trusted inside
/// restrictive in-app browsers, so the response must never be cached.
async fn check_access(headers: HeaderMap) -> impl IntoResponse {
    let marker = header_str(&headers, PAYMENT_SUCCESS_HEADER);
    let email = header_str(&headers, PAID_EMAIL_HEADER);
    let has_access = marker == Some("true") && email.is_some_and(|e| !e.is_empty());

    let mut out = HeaderMap::new();
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    (StatusCode::OK, out, Json(json!({"hasAccess": has_access})))
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    message: String,
}

async fn chat_proxy(State(state): State<AppState>, Json(payload): Json<ChatPayload>) -> impl IntoResponse {
    if payload.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "message required"})));
    }
    match state.chat.ask(&payload.message).await {
        Ok(answer) => (StatusCode::OK, Json(json!(answer))),
        Err(e) => {
            error!("chat proxy failed: {e}");
            let app = AppError::upstream("chat_unavailable", "answering service unavailable");
            (
                StatusCode::from_u16(app.http_status()).unwrap_or(StatusCode::BAD_GATEWAY),
                Json(json!({"error": app.message(), "code": app.code_str()})),
            )
        }
    }
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscription>,
) -> impl IntoResponse {
    if state.billing.prices().price_for(&req.plan).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": format!("unknown plan: {}", req.plan)})),
        );
    }
    info!(target: "billing", "creating subscription for {} plan={}", req.email, req.plan);
    match state.billing.create_subscription(&req).await {
        Ok(created) => (StatusCode::OK, Json(json!(created))),
        Err(e) => {
            error!("subscription creation error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"success": false, "error": e.to_string()})))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckSubscriptionQuery {
    email: Option<String>,
}

async fn check_subscription(
    State(state): State<AppState>,
    Query(q): Query<CheckSubscriptionQuery>,
) -> impl IntoResponse {
    let Some(email) = q.email.filter(|e| !e.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Email required"})));
    };
    match state.billing.check_subscription(&email).await {
        Ok(Some(sub)) => (StatusCode::OK, Json(json!({"hasSubscription": true, "subscription": sub}))),
        Ok(None) => (StatusCode::OK, Json(json!({"hasSubscription": false, "subscription": null}))),
        Err(e) => {
            error!("subscription check error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
        }
    }
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(signature) = header_str(&headers, SIGNATURE_HEADER) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Webhook Error: missing signature"})));
    };
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = verify_webhook_signature(&state.webhook_secret, signature, &body, now, DEFAULT_TOLERANCE_SECS) {
        warn!(target: "billing", "webhook signature verification failed: {e}");
        return (StatusCode::BAD_REQUEST, Json(json!({"error": format!("Webhook Error: {e}")})));
    }
    match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => {
            info!(target: "billing", "webhook event received: {}", event.kind);
            dispatch_webhook_event(&event);
            (StatusCode::OK, Json(json!({"received": true})))
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": format!("Webhook Error: invalid payload: {e}")}))),
    }
}
