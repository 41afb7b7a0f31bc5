use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Path prefix shared by the JWT auth endpoints
pub const AUTH_PATH_PREFIX: &str = "/auth-jwt/";

// ==================================================================================================
// HTTP Methods
// ==================================================================================================

/// HTTP verbs understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// POST, PUT and PATCH: carry a body and have their responses cached
    pub fn is_mutating(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unknown HTTP method: {}", other)),
        }
    }
}

// ==================================================================================================
// Resource Operations
// ==================================================================================================

/// Resource operations exposed by the compute API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Read,
    Create,
    Update,
    PartialUpdate,
}

impl Operation {
    pub fn method(self) -> HttpMethod {
        match self {
            Operation::List | Operation::Read => HttpMethod::Get,
            Operation::Create => HttpMethod::Post,
            Operation::Update => HttpMethod::Put,
            Operation::PartialUpdate => HttpMethod::Patch,
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "list" => Ok(Operation::List),
            "read" => Ok(Operation::Read),
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "partial_update" => Ok(Operation::PartialUpdate),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

// ==================================================================================================
// Request Spec
// ==================================================================================================

/// Request body before encoding
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Structured value, serialized as JSON
    Json(Value),
    /// Opaque bytes such as file content
    Bytes(Bytes),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

/// Everything needed to build one API request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<RequestBody>,
    pub query: Option<Vec<(String, String)>>,
    pub extra_headers: Option<Vec<(String, String)>>,
    /// Send the body as opaque bytes instead of JSON
    pub raw_body: bool,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: None,
            extra_headers: None,
            raw_body: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(HttpMethod::Post, path).body(body)
    }

    pub fn put(path: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(HttpMethod::Put, path).body(body)
    }

    pub fn patch(path: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(HttpMethod::Patch, path).body(body)
    }

    /// Request for a resource operation
    pub fn for_operation(operation: Operation, path: impl Into<String>) -> Self {
        Self::new(operation.method(), path)
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach opaque bytes sent without JSON encoding
    pub fn raw(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(bytes.into()));
        self.raw_body = true;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    /// Whether the path targets one of the JWT auth endpoints
    pub fn is_auth_endpoint(&self) -> bool {
        self.path.starts_with(AUTH_PATH_PREFIX)
    }
}
