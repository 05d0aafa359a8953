use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port: u16 = std::env::var("CHATGATE_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);
    let billing_api_base = std::env::var("CHATGATE_BILLING_API_BASE")
        .unwrap_or_else(|_| "https://api.stripe.com".to_string());
    let billing_secret_key = std::env::var("STRIPE_SECRET_KEY").unwrap_or_default();
    let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
    let weekly_price_id =
        std::env::var("STRIPE_WEEKLY_PRICE_ID").unwrap_or_else(|_| "price_weekly_placeholder".to_string());
    let monthly_price_id =
        std::env::var("STRIPE_MONTHLY_PRICE_ID").unwrap_or_else(|_| "price_monthly_placeholder".to_string());
    let chat_endpoint = std::env::var("CHATGATE_CHAT_ENDPOINT")
        .unwrap_or_else(|_| "http://127.0.0.1:8000/api/chat".to_string());

    info!(
        target: "chatgate",
        "chatgate starting: RUST_LOG='{}', http_port={}, billing_api_base='{}', chat_endpoint='{}'",
        rust_log, http_port, billing_api_base, chat_endpoint
    );

    chatgate::server::run_with_config(chatgate::server::ServerConfig {
        http_port,
        billing_api_base,
        billing_secret_key,
        webhook_secret,
        weekly_price_id,
        monthly_price_id,
        chat_endpoint,
    })
    .await
}
