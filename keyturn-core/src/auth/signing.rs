//! Request signing strategies for login and refresh payloads
//!
//! The service's real signature scheme is unknown. Signing is a configured strategy
//! so a new scheme can be dropped in without touching the session manager.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const SIGNATURE_HEADER: &str = "x-request-signature";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Inputs available to a signer besides the payload
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub device_id: &'a str,
    /// UTC RFC 3339 timestamp with `Z` suffix
    pub timestamp: String,
}

impl<'a> SigningContext<'a> {
    pub fn now(device_id: &'a str) -> Self {
        Self {
            device_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Produces extra headers for an outgoing auth payload
pub trait RequestSigner: Send + Sync {
    fn name(&self) -> &'static str;

    fn sign(&self, payload: &Value, ctx: &SigningContext<'_>) -> Vec<(&'static str, String)>;
}

/// Signing strategy selected in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningMode {
    #[default]
    None,
    PayloadDigest,
}

/// Adds no headers
#[derive(Debug, Default)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn name(&self) -> &'static str {
        "none"
    }

    fn sign(&self, _payload: &Value, _ctx: &SigningContext<'_>) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// SHA-256 over the key-sorted payload, the timestamp and the device id
#[derive(Debug)]
pub struct PayloadDigest {
    client_id: String,
}

impl PayloadDigest {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    fn digest(payload: &Value, ctx: &SigningContext<'_>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sorted_keys(payload).to_string().as_bytes());
        hasher.update(ctx.timestamp.as_bytes());
        hasher.update(ctx.device_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl RequestSigner for PayloadDigest {
    fn name(&self) -> &'static str {
        "payload-digest"
    }

    fn sign(&self, payload: &Value, ctx: &SigningContext<'_>) -> Vec<(&'static str, String)> {
        vec![
            (SIGNATURE_HEADER, Self::digest(payload, ctx)),
            (CLIENT_ID_HEADER, self.client_id.clone()),
            (TIMESTAMP_HEADER, ctx.timestamp.clone()),
        ]
    }
}

/// Copy of `value` with object keys in sorted order at every level
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted_keys(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

/// Build the signer for a configured mode
pub fn signer_for(mode: SigningMode, client_id: &str) -> Box<dyn RequestSigner> {
    match mode {
        SigningMode::None => Box::new(Unsigned),
        SigningMode::PayloadDigest => Box::new(PayloadDigest::new(client_id)),
    }
}
