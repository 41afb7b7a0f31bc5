use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::token::{self, DecodedPayload};
use super::types::{
    Credentials, LoginRequest, RefreshRequest, TokenPair, TokenResponse, VerifyRequest,
};
use crate::error::{ClientError, Result};
use crate::http_client::RequestDispatcher;
use crate::models::{RequestSpec, ResponseEnvelope};

pub const LOGIN_PATH: &str = "/auth-jwt/get/";
pub const REFRESH_PATH: &str = "/auth-jwt/refresh/";
pub const VERIFY_PATH: &str = "/auth-jwt/verify/";

/// Refresh when the access token has this many seconds or fewer left
pub const DEFAULT_REFRESH_MARGIN_SECS: f64 = 20.0;

/// Authenticated session against one compute server
/// Owns the credentials and the current token pair
pub struct AuthSession {
    /// Login credentials, fixed for the session's lifetime
    credentials: Credentials,

    /// Current tokens; held across check-then-refresh so refreshes serialize
    tokens: Mutex<TokenPair>,

    /// Dispatcher for the auth endpoints and API calls
    dispatcher: Arc<RequestDispatcher>,

    /// Margin used by transparent refresh-before-use
    refresh_margin: f64,
}

impl AuthSession {
    /// Create a session with no tokens; call [`AuthSession::login`] next
    pub fn new(credentials: Credentials, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            credentials,
            tokens: Mutex::new(TokenPair::default()),
            dispatcher,
            refresh_margin: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }

    /// Create a session that already holds tokens
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(
        credentials: Credentials,
        dispatcher: Arc<RequestDispatcher>,
        tokens: TokenPair,
    ) -> Self {
        Self {
            credentials,
            tokens: Mutex::new(tokens),
            dispatcher,
            refresh_margin: DEFAULT_REFRESH_MARGIN_SECS,
        }
    }

    pub fn with_refresh_margin(mut self, seconds: f64) -> Self {
        self.refresh_margin = seconds;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn host(&self) -> &str {
        &self.credentials.host
    }

    pub fn refresh_margin(&self) -> f64 {
        self.refresh_margin
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    /// Current access token, if a non-empty one is held
    pub async fn access_token(&self) -> Option<String> {
        self.tokens.lock().await.access().map(str::to_string)
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.tokens.lock().await.refresh().is_some()
    }

    /// Claims of the current access token
    pub async fn payload(&self) -> Result<Option<DecodedPayload>> {
        let tokens = self.tokens.lock().await;
        tokens.access().map(token::decode_payload).transpose()
    }

    /// Seconds until the current access token expires
    pub async fn remaining_seconds(&self) -> Result<Option<f64>> {
        let tokens = self.tokens.lock().await;
        token::remaining_seconds(tokens.access())
    }

    /// Expiry time of the current access token
    pub async fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        let tokens = self.tokens.lock().await;
        tokens.access().map(token::expires_at).transpose()
    }

    /// Obtain a fresh access + refresh token pair.
    ///
    /// Tokens are cleared first and stay cleared if the login fails.
    pub async fn login(&self) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        tokens.clear();

        tracing::info!(
            "Logging in as {} at {}",
            self.credentials.username,
            self.credentials.host
        );

        let body = serde_json::to_value(LoginRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
        })
        .context("Failed to encode login request")?;

        let envelope = self
            .dispatcher
            .dispatch_raw(self.host(), None, &RequestSpec::post(LOGIN_PATH, body))
            .await;

        if let Some(failure) = &envelope.error {
            tracing::error!("Login failed: {}", failure);
            return Err(ClientError::AuthError(format!("login failed: {}", failure)));
        }

        let response = TokenResponse::from_envelope(&envelope);
        let (access, refresh) = match (response.access(), response.refresh()) {
            (Some(access), Some(refresh)) => (access.to_string(), refresh.to_string()),
            _ => {
                tracing::error!("Login response is missing a token field: {}", envelope);
                return Err(ClientError::AuthError("missing token field".to_string()));
            }
        };

        tokens.access = Some(access.clone());
        tokens.refresh = Some(refresh);

        log_expiry("Got new token", &access);
        Ok(access)
    }

    /// Return a token valid for more than `min_remaining_seconds`,
    /// refreshing it at most once if needed.
    ///
    /// Returns `None` without any network call when no refresh token is held.
    pub async fn ensure_fresh(&self, min_remaining_seconds: f64) -> Result<Option<String>> {
        let mut tokens = self.tokens.lock().await;

        let refresh = match tokens.refresh() {
            Some(refresh) => refresh.to_string(),
            None => return Ok(None),
        };

        if let Some(remaining) = token::remaining_seconds(tokens.access())? {
            if remaining > min_remaining_seconds {
                tracing::debug!("No refresh required. Token will expire in {:.0}s", remaining);
                return Ok(tokens.access.clone());
            }
        }

        tracing::debug!("Refreshing access token...");

        let body = serde_json::to_value(RefreshRequest { refresh: &refresh })
            .context("Failed to encode refresh request")?;

        let envelope = self
            .dispatcher
            .dispatch_raw(self.host(), tokens.access(), &RequestSpec::post(REFRESH_PATH, body))
            .await;

        let access = access_from(&envelope, "refresh")?;
        tokens.access = Some(access.clone());

        log_expiry("Refreshed token", &access);
        Ok(Some(access))
    }

    /// Refresh the access token regardless of how long it has left
    pub async fn refresh(&self) -> Result<Option<String>> {
        self.ensure_fresh(f64::INFINITY).await
    }

    /// Explicit liveness check of the current access token
    pub async fn verify(&self) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        let current = tokens.access().unwrap_or_default().to_string();

        let body = serde_json::to_value(VerifyRequest { token: &current })
            .context("Failed to encode verify request")?;

        let envelope = self
            .dispatcher
            .dispatch_raw(self.host(), tokens.access(), &RequestSpec::post(VERIFY_PATH, body))
            .await;

        let access = access_from(&envelope, "verify")?;
        tokens.access = Some(access.clone());

        tracing::info!("Access token verified");
        Ok(access)
    }

    /// Send a request through the session's dispatcher
    pub async fn send(&self, spec: &RequestSpec) -> Result<ResponseEnvelope> {
        self.dispatcher.send(self, spec).await
    }

    /// Previously cached response for this request, without sending it
    pub fn send_cached(&self, spec: &RequestSpec) -> Option<ResponseEnvelope> {
        self.dispatcher.send_cached(self, spec)
    }
}

/// Pull the new access token out of a refresh/verify response
fn access_from(envelope: &ResponseEnvelope, action: &str) -> Result<String> {
    if let Some(failure) = &envelope.error {
        tracing::error!("Token {} failed: {}", action, failure);
        return Err(ClientError::AuthError(format!("{} failed: {}", action, failure)));
    }

    TokenResponse::from_envelope(envelope)
        .access()
        .map(str::to_string)
        .ok_or_else(|| ClientError::AuthError(format!("{} response missing access token", action)))
}

fn log_expiry(event: &str, access: &str) {
    match token::remaining_seconds(Some(access)) {
        Ok(Some(remaining)) => {
            tracing::info!("{}. Will expire in {:.0}s", event, remaining);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("{}, but its expiry could not be read: {}", event, e),
    }
}
