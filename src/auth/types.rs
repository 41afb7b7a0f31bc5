// Authentication types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{ResponseBody, ResponseEnvelope};

/// Login credentials for one compute server
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Current access/refresh token pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl TokenPair {
    pub fn clear(&mut self) {
        self.access = None;
        self.refresh = None;
    }

    /// Access token, if a non-empty one is held
    pub fn access(&self) -> Option<&str> {
        self.access.as_deref().filter(|t| !t.is_empty())
    }

    /// Refresh token, if a non-empty one is held
    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.access().is_none() && self.refresh().is_none()
    }
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Refresh request body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Verify request body
#[derive(Serialize)]
pub struct VerifyRequest<'a> {
    pub token: &'a str,
}

/// Token fields returned by the auth endpoints
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl TokenResponse {
    /// Extract token fields from a response envelope.
    ///
    /// Non-object bodies yield an empty response.
    pub fn from_envelope(envelope: &ResponseEnvelope) -> Self {
        match &envelope.body {
            ResponseBody::Json(value) if value.is_object() => {
                serde_json::from_value(value.clone()).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }

    pub fn access(&self) -> Option<&str> {
        self.access.as_deref().filter(|t| !t.is_empty())
    }

    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref().filter(|t| !t.is_empty())
    }
}
