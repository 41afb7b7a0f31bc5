use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Response payload: parsed JSON when possible, the raw text otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Raw(String),
}

impl ResponseBody {
    /// Parse `text` as JSON, keeping it verbatim if that fails
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Raw(text),
        }
    }

    /// Null, empty collections and empty strings count as empty.
    ///
    /// `0` and `false` are values, not emptiness.
    pub fn is_empty(&self) -> bool {
        match self {
            ResponseBody::Json(Value::Null) => true,
            ResponseBody::Json(Value::Array(items)) => items.is_empty(),
            ResponseBody::Json(Value::Object(map)) => map.is_empty(),
            ResponseBody::Json(Value::String(s)) => s.is_empty(),
            ResponseBody::Json(_) => false,
            ResponseBody::Raw(text) => text.is_empty(),
        }
    }
}

/// Transport or HTTP-level failure captured into an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// HTTP status; absent when no response was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub reason: String,
}

impl Failure {
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} {}", status, self.reason),
            None => write!(f, "transport failure: {}", self.reason),
        }
    }
}

/// Normalized result of one dispatched request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub body: ResponseBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl ResponseEnvelope {
    /// Successful envelope from a response body
    pub fn from_text(text: String) -> Self {
        Self {
            body: ResponseBody::parse(text),
            error: None,
        }
    }

    /// Envelope for a request that never produced a response
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            body: ResponseBody::Raw(reason.clone()),
            error: Some(Failure::transport(reason)),
        }
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.error = Some(failure);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    /// Field of a JSON object body
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json().and_then(|value| value.get(key))
    }
}

impl fmt::Display for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(failure) = &self.error {
            writeln!(f, "[{}]", failure)?;
        }
        match &self.body {
            ResponseBody::Json(value) => {
                let pretty = serde_json::to_string_pretty(value).map_err(|_| fmt::Error)?;
                f.write_str(&pretty)
            }
            ResponseBody::Raw(text) => f.write_str(text),
        }
    }
}
