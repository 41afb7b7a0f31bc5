use anyhow::{Context, Result};
use std::sync::Arc;

use compute_client::auth::AuthSession;
use compute_client::cache::ResponseCache;
use compute_client::config::{self, Command, Config};
use compute_client::http_client::RequestDispatcher;
use compute_client::models::RequestSpec;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load()?;

    // Prompt for missing credentials when attached to a terminal
    if config::needs_interactive_setup(&config) {
        config::run_interactive_setup(&mut config)?;
    }
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "HTTP timeouts: connect={}s request={}s, refresh margin={}s",
        config.http_connect_timeout,
        config.http_request_timeout,
        config.token_refresh_margin
    );

    let dispatcher = Arc::new(RequestDispatcher::new(
        ResponseCache::global(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    let session = AuthSession::new(config.credentials()?, dispatcher)
        .with_refresh_margin(config.token_refresh_margin);

    let token = session.login().await.context("Login failed")?;
    tracing::info!(
        "✅ Logged in as {} (token: {}...)",
        session.credentials().username,
        token.chars().take(20).collect::<String>()
    );

    match config.command.clone() {
        Command::Login => {
            print_expiry(&session).await?;
        }

        Command::Token { refresh, verify } => {
            if refresh {
                session.refresh().await.context("Token refresh failed")?;
            }
            if verify {
                session.verify().await.context("Token verification failed")?;
            }

            print_expiry(&session).await?;
            let payload = session.payload().await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }

        Command::Request {
            method,
            path,
            data,
            query,
            headers,
        } => {
            let mut spec = RequestSpec::new(method, path);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).context("--data must be valid JSON")?;
                spec = spec.body(body);
            }
            for (key, value) in query {
                spec = spec.query(key, value);
            }
            for (name, value) in headers {
                spec = spec.header(name, value);
            }

            let envelope = session.send(&spec).await?;
            println!("{}", envelope);

            if let Some(failure) = &envelope.error {
                anyhow::bail!("Request failed: {}", failure);
            }
        }
    }

    Ok(())
}

/// Print how long the current access token stays valid
async fn print_expiry(session: &AuthSession) -> Result<()> {
    match (session.remaining_seconds().await?, session.expires_at().await?) {
        (Some(remaining), Some(at)) => {
            println!("Token expires in {:.0} seconds (at {})", remaining, at.to_rfc3339())
        }
        _ => println!("No access token held"),
    }
    Ok(())
}
