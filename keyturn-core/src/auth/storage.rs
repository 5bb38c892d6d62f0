//! File-backed session storage
//!
//! The token pair is written as plain JSON. It is NOT encrypted and relies only on
//! the permissions of the data directory; treat the file as a secret.

use super::types::{AuthError, TokenPair};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use crate::utils::write_atomic;
use std::path::{Path, PathBuf};

pub const SESSION_FILE: &str = "session.json";

/// A persisted token pair plus the context it was issued in
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub tokens: TokenPair,
    /// Base URL that issued the tokens
    pub base_url: Option<String>,
    pub device_id: Option<String>,
}

/// On-disk layout. Accepts the snake_case keys written by older clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    #[serde(alias = "access_token")]
    access_token: String,
    #[serde(alias = "refresh_token")]
    refresh_token: String,
    #[serde(alias = "timestamp", default = "Utc::now", deserialize_with = "de_issued_at")]
    issued_at: DateTime<Utc>,
    #[serde(default, alias = "base_url", skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, alias = "device_id", skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

/// RFC 3339, or a naive ISO timestamp taken as UTC
fn de_issued_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

impl From<&StoredSession> for SessionRecord {
    fn from(session: &StoredSession) -> Self {
        Self {
            access_token: session.tokens.access_token.clone(),
            refresh_token: session.tokens.refresh_token.clone(),
            issued_at: session.tokens.issued_at,
            base_url: session.base_url.clone(),
            device_id: session.device_id.clone(),
        }
    }
}

impl From<SessionRecord> for StoredSession {
    fn from(record: SessionRecord) -> Self {
        Self {
            tokens: TokenPair {
                access_token: record.access_token,
                refresh_token: record.refresh_token,
                issued_at: record.issued_at,
            },
            base_url: record.base_url,
            device_id: record.device_id,
        }
    }
}

/// Session persistence at a fixed path inside the data directory
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored session. The write is atomic, so a crash never leaves a
    /// half-written session.
    pub fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(&SessionRecord::from(session))
            .map_err(|e| AuthError::Persistence(format!("Failed to serialize session: {}", e)))?;

        write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            error!("Failed to write session file {}: {}", self.path.display(), e);
            AuthError::Persistence(format!("Failed to write session file: {}", e))
        })?;

        info!(
            "Session stored to {} (issued {})",
            self.path.display(),
            session.tokens.issued_at
        );
        Ok(())
    }

    /// Load the stored session. A missing file is `None`; a malformed one is an error.
    pub fn load(&self) -> Result<Option<StoredSession>, AuthError> {
        if !self.path.exists() {
            debug!("Session file does not exist (first run or logged out)");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| AuthError::Persistence(format!("Failed to read session file: {}", e)))?;

        let record: SessionRecord = serde_json::from_str(&json).map_err(|e| {
            AuthError::Persistence(format!("Failed to decode session file: {}", e))
        })?;

        if record.access_token.is_empty() || record.refresh_token.is_empty() {
            warn!("Session file {} holds an empty token", self.path.display());
            return Err(AuthError::Persistence(
                "Session file holds an empty token".to_string(),
            ));
        }

        info!("Loaded session from {}", self.path.display());
        Ok(Some(record.into()))
    }

    /// Delete the stored session
    pub fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                AuthError::Persistence(format!("Failed to delete session file: {}", e))
            })?;
            info!("Cleared session file");
        }
        Ok(())
    }
}
