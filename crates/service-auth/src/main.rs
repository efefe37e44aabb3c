//! Service Auth CLI
//!
//! Obtains a verified service token from the configured authority and prints
//! the `Authorization` header value to stdout. Logs go to stderr.
//!
//! Usage: `service-auth [payload-json]`

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use service_auth::config::Config;
use service_auth::secret::ExposeSecret;
use service_auth::token_manager::TokenLifecycleManager;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "service_auth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let payload = match std::env::args().nth(1) {
        Some(raw) => parse_payload(&raw)?,
        None => Map::new(),
    };

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        core_url = %config.core_url,
        jwks_url = %config.jwks_url(),
        validity_days = config.validity_days,
        "Configuration loaded successfully"
    );

    let manager = TokenLifecycleManager::from_config(&config)?;
    let verified = manager
        .get_verified_token(&payload, config.validity_days)
        .await
        .context("failed to obtain a verified token")?;

    info!(
        freshly_issued = verified.freshly_issued,
        was_already_valid = verified.was_already_valid,
        "Token ready"
    );

    println!("{}", verified.authorization_header().expose_secret());
    Ok(())
}

fn parse_payload(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("payload must be a JSON object, got {other}"),
    }
}
