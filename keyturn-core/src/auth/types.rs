//! Authentication types

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session state of an [`AuthSessionManager`](super::AuthSessionManager)
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// No token pair held
    #[default]
    Unauthenticated,
    /// Holding a token pair that has not been proven stale
    Authenticated(TokenPair),
    /// The access token was rejected; the pair is kept so a refresh can be attempted
    Expired(TokenPair),
}

impl SessionState {
    /// The held token pair, if any
    pub fn tokens(&self) -> Option<&TokenPair> {
        match self {
            SessionState::Authenticated(pair) | SessionState::Expired(pair) => Some(pair),
            SessionState::Unauthenticated => None,
        }
    }

    /// Short lowercase label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Expired(_) => "expired",
        }
    }
}

/// Access/refresh token pair issued by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            issued_at: Utc::now(),
        }
    }
}

/// Login credentials. Never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// National id / register id; some deployments reject a blank one
    pub register_id: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            register_id: None,
        }
    }

    pub fn with_register_id(mut self, register_id: impl Into<String>) -> Self {
        self.register_id = Some(register_id.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("register_id", &self.register_id)
            .finish()
    }
}

/// Stable per-installation device identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    /// Only present for identities produced by the handset generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<DeviceProfile>,
}

/// Simulated handset attributes sent as device headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub os_version: String,
    pub api_level: String,
    pub android_id: String,
    pub build_id: String,
    pub user_agent: String,
}

/// Login request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub device_id: &'a str,
    /// Serialized as `null` when absent
    pub register_id: Option<&'a str>,
}

/// Refresh request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenFields {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenFields {
    fn into_pair(self) -> Option<TokenPair> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(TokenPair::new(access, refresh))
            }
            _ => None,
        }
    }
}

/// Token-issuing response body. Tokens may sit at the top level or under `data`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(flatten)]
    top: TokenFields,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl TokenResponse {
    /// Extract a complete token pair, or `None` if either token is missing or empty
    pub fn into_pair(self) -> Option<TokenPair> {
        if let Some(pair) = self.top.into_pair() {
            return Some(pair);
        }
        match self.data {
            Some(value @ serde_json::Value::Object(_)) => {
                serde_json::from_value::<TokenFields>(value)
                    .ok()
                    .and_then(TokenFields::into_pair)
            }
            _ => None,
        }
    }
}

/// Response of an authenticated call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AuthError> {
        serde_json::from_str(&self.body)
            .map_err(|e| AuthError::MalformedResponse(format!("Failed to parse body: {}", e)))
    }
}

/// Error types for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Service unreachable{}: {cause}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Unreachable { status: Option<u16>, cause: String },

    #[error("No session, please sign in")]
    NoSession,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Session expired, please sign in again")]
    SessionExpired,

    #[error("Request failed with HTTP {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        let cause = if e.is_timeout() {
            format!("request timed out: {}", e)
        } else if e.is_connect() {
            format!("connection failed: {}", e)
        } else {
            e.to_string()
        };
        AuthError::Unreachable {
            status: None,
            cause,
        }
    }
}
