//! Settings persistence module
//!
//! Saves and loads client settings to/from disk

use crate::auth::identity::IdentityMode;
use crate::auth::signing::SigningMode;
use crate::auth::AuthError;
use crate::utils::write_atomic;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE: &str = "settings.json";
pub const APP_NAME: &str = "Keyturn";

/// Client settings. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Explicit base URL; wins over `endpoints[0]` when set
    pub base_url: Option<String>,
    /// Candidate base URLs, probed in order
    pub endpoints: Vec<String>,
    pub login_path: String,
    pub refresh_path: String,
    /// Ceiling for login, refresh and authenticated calls
    pub request_timeout_secs: u64,
    /// Ceiling for each candidate while probing endpoints
    pub probe_timeout_secs: u64,
    pub user_agent: String,
    pub app_version: String,
    pub platform: String,
    /// Sent as `x-client-id` by signing strategies that need it
    pub client_id: String,
    pub signing: SigningMode,
    pub identity: IdentityMode,
    /// Where the device identity and session live (None = platform data dir)
    pub data_dir: Option<PathBuf>,
}

fn default_endpoints() -> Vec<String> {
    [
        "https://api-jmo.bpjsketenagakerjaan.go.id",
        "https://api.bpjsketenagakerjaan.go.id",
        "https://mobile-api.bpjsketenagakerjaan.go.id",
        "https://app.bpjsketenagakerjaan.go.id",
        "https://jamsostek-api.bpjsketenagakerjaan.go.id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoints: default_endpoints(),
            login_path: "/login".to_string(),
            refresh_path: "/refresh-token".to_string(),
            request_timeout_secs: 30,
            probe_timeout_secs: 10,
            user_agent: "Jamsostek-Mobile/Android/4.0.3".to_string(),
            app_version: "4.0.3".to_string(),
            platform: "Android".to_string(),
            client_id: "com.bpjstku".to_string(),
            signing: SigningMode::None,
            identity: IdentityMode::Machine,
            data_dir: None,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// The configured data directory, or `<data_local_dir>/Keyturn`
    pub fn resolve_data_dir(&self) -> Result<PathBuf, AuthError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join(APP_NAME))
            .ok_or_else(|| {
                AuthError::Configuration("Could not determine data directory".to_string())
            })
    }
}

/// Get the settings directory path
/// Linux: ~/.config/Keyturn/
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn get_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from the default location
pub fn load_settings() -> ClientSettings {
    match get_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("Could not determine settings path, using defaults");
            ClientSettings::default()
        }
    }
}

/// Load settings from `path`. A missing, unreadable or unparsable file yields the
/// defaults, so a broken settings file never keeps the client from starting.
pub fn load_settings_from(path: &Path) -> ClientSettings {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No settings at {}, using defaults", path.display());
            return ClientSettings::default();
        }
        Err(e) => {
            warn!("Cannot read settings {}: {}, using defaults", path.display(), e);
            return ClientSettings::default();
        }
    };

    serde_json::from_str(&content)
        .map(|settings| {
            info!("Loaded settings from {}", path.display());
            settings
        })
        .unwrap_or_else(|e| {
            warn!("Ignoring malformed settings {}: {}", path.display(), e);
            ClientSettings::default()
        })
}

/// Save settings to the default location
pub fn save_settings(settings: &ClientSettings) -> Result<(), AuthError> {
    let path = get_settings_path().ok_or_else(|| {
        AuthError::Configuration("Could not determine settings directory".to_string())
    })?;
    save_settings_to(settings, &path)
}

/// Atomically replace the settings file at `path`, creating its directory if needed
pub fn save_settings_to(settings: &ClientSettings, path: &Path) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| AuthError::Configuration(format!("Failed to serialize settings: {}", e)))?;

    write_atomic(path, json.as_bytes()).map_err(|e| {
        AuthError::Persistence(format!("Failed to write {}: {}", path.display(), e))
    })?;
    info!("Saved settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert!(settings.base_url.is_none());
        assert_eq!(settings.endpoints.len(), 5);
        assert_eq!(settings.login_path, "/login");
        assert_eq!(settings.refresh_path, "/refresh-token");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert!(settings.probe_timeout() < settings.request_timeout());
        assert_eq!(settings.signing, SigningMode::None);
        assert_eq!(settings.identity, IdentityMode::Machine);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{"base_url": "https://staging.example", "signing": "payload-digest"}"#;
        let loaded: ClientSettings = serde_json::from_str(json).unwrap();
        assert_eq!(loaded.base_url.as_deref(), Some("https://staging.example"));
        assert_eq!(loaded.signing, SigningMode::PayloadDigest);
        assert_eq!(loaded.endpoints, default_endpoints());
        assert_eq!(loaded.request_timeout_secs, 30);
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let settings = ClientSettings {
            request_timeout_secs: 0,
            ..ClientSettings::default()
        };
        assert_eq!(settings.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_settings_roundtrip_on_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(SETTINGS_FILE);
        let settings = ClientSettings {
            endpoints: vec!["https://only.example".to_string()],
            identity: IdentityMode::Handset,
            data_dir: Some(tmp.path().to_path_buf()),
            ..ClientSettings::default()
        };

        save_settings_to(&settings, &path).unwrap();
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        fs::write(&path, "not json").unwrap();
        assert_eq!(load_settings_from(&path), ClientSettings::default());
    }

    #[test]
    fn test_unreadable_path_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be read as a file
        assert_eq!(load_settings_from(tmp.path()), ClientSettings::default());
        assert_eq!(
            load_settings_from(&tmp.path().join("missing.json")),
            ClientSettings::default()
        );
    }

    #[test]
    fn test_save_replaces_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        save_settings_to(&ClientSettings::default(), &path).unwrap();

        let changed = ClientSettings {
            probe_timeout_secs: 3,
            ..ClientSettings::default()
        };
        save_settings_to(&changed, &path).unwrap();

        assert_eq!(load_settings_from(&path).probe_timeout_secs, 3);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_onto_directory_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            save_settings_to(&ClientSettings::default(), tmp.path()),
            Err(AuthError::Persistence(_))
        ));
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let settings = ClientSettings {
            data_dir: Some(PathBuf::from("/tmp/keyturn-test")),
            ..ClientSettings::default()
        };
        assert_eq!(
            settings.resolve_data_dir().unwrap(),
            PathBuf::from("/tmp/keyturn-test")
        );
    }
}
