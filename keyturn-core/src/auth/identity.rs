//! Persistent per-installation device identity
//!
//! The identity is created once and reused on every start. Losing it changes the
//! fingerprint the remote service sees, so write failures are propagated instead of
//! falling back to an ephemeral id.

use super::types::{AuthError, DeviceIdentity, DeviceProfile};
use crate::utils::write_atomic;
use chrono::Utc;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const IDENTITY_FILE: &str = "device_identity.json";

/// How a missing identity is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// UUIDv5 over hostname, architecture and OS name
    #[default]
    Machine,
    /// UUIDv4
    Random,
    /// Simulated Android handset with a full device profile
    Handset,
}

struct HandsetModel {
    model: &'static str,
    name: &'static str,
}

const HANDSET_MODELS: &[HandsetModel] = &[
    HandsetModel { model: "SM-A325F", name: "Samsung Galaxy A32" },
    HandsetModel { model: "SM-A525F", name: "Samsung Galaxy A52" },
    HandsetModel { model: "SM-G973F", name: "Samsung Galaxy S10" },
    HandsetModel { model: "SM-G998B", name: "Samsung Galaxy S21 Ultra" },
    HandsetModel { model: "SM-M315F", name: "Samsung Galaxy M31" },
    HandsetModel { model: "SM-A107F", name: "Samsung Galaxy A10s" },
    HandsetModel { model: "SM-N975F", name: "Samsung Galaxy Note 10+" },
];

// (version, api level, release letter)
const ANDROID_RELEASES: &[(&str, &str, &str)] = &[("11", "30", "R"), ("12", "31", "S"), ("13", "33", "T")];

/// File-backed device identity
pub struct IdentityStore {
    path: PathBuf,
    mode: IdentityMode,
}

impl IdentityStore {
    pub fn new(data_dir: &Path, mode: IdentityMode) -> Self {
        Self {
            path: data_dir.join(IDENTITY_FILE),
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted identity, creating and persisting one on first use
    pub fn get_or_create_device_id(&self) -> Result<DeviceIdentity, AuthError> {
        if let Some(identity) = self.load()? {
            debug!("Loaded device identity from {}", self.path.display());
            return Ok(identity);
        }

        let identity = match self.mode {
            IdentityMode::Machine => machine_identity(),
            IdentityMode::Random => DeviceIdentity {
                id: Uuid::new_v4().to_string(),
                profile: None,
            },
            IdentityMode::Handset => handset_identity(),
        };

        self.store(&identity)?;
        info!(
            "Created {:?} device identity {} at {}",
            self.mode,
            identity.id,
            self.path.display()
        );
        Ok(identity)
    }

    fn load(&self) -> Result<Option<DeviceIdentity>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            AuthError::Persistence(format!("Failed to read device identity: {}", e))
        })?;
        let content = content.trim();

        // Older installs wrote the bare id with no JSON wrapper
        let identity = match serde_json::from_str::<DeviceIdentity>(content) {
            Ok(identity) => identity,
            Err(_) if !content.starts_with('{') => DeviceIdentity {
                id: content.to_string(),
                profile: None,
            },
            Err(e) => {
                return Err(AuthError::Persistence(format!(
                    "Failed to parse device identity: {}",
                    e
                )));
            }
        };

        if identity.id.trim().is_empty() {
            warn!("Device identity file {} is empty", self.path.display());
            return Err(AuthError::Persistence(
                "Device identity file is empty".to_string(),
            ));
        }

        Ok(Some(identity))
    }

    /// Atomic write: an interrupted first run leaves no identity file rather than a
    /// truncated one that every later start would refuse to load.
    fn store(&self, identity: &DeviceIdentity) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(identity).map_err(|e| {
            AuthError::Persistence(format!("Failed to serialize device identity: {}", e))
        })?;

        write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            AuthError::Persistence(format!("Failed to write device identity: {}", e))
        })
    }
}

/// Name-based identity: the same machine always yields the same id
fn machine_identity() -> DeviceIdentity {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let fingerprint = machine_fingerprint(&host, std::env::consts::ARCH, std::env::consts::OS);
    DeviceIdentity {
        id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, fingerprint.as_bytes()).to_string(),
        profile: None,
    }
}

fn machine_fingerprint(host: &str, arch: &str, os: &str) -> String {
    format!("{}-{}-{}", host, arch, os)
}

fn handset_identity() -> DeviceIdentity {
    let mut rng = rand::thread_rng();

    let handset = HANDSET_MODELS
        .choose(&mut rng)
        .unwrap_or(&HANDSET_MODELS[0]);
    let (os_version, api_level, release) = *ANDROID_RELEASES
        .choose(&mut rng)
        .unwrap_or(&ANDROID_RELEASES[0]);

    let android_id: String = (0..16)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();

    // 10 timestamp digits + 6 random digits + 4 checksum hex chars
    let millis = Utc::now().timestamp_millis().to_string();
    let stamp = &millis[millis.len().saturating_sub(10)..];
    let random_part: String = (0..6)
        .map(|_| char::from_digit(rng.gen_range(0..10), 10).unwrap_or('0'))
        .collect();
    let checksum = hex::encode(Sha256::digest(format!("{}{}", handset.model, android_id)));
    let id = format!("{}{}{}", stamp, random_part, &checksum[..4]);

    let build_id = format!(
        "{}.{}.{}",
        release,
        rng.gen_range(100_000..1_000_000),
        rng.gen_range(100..1000)
    );
    let user_agent = format!(
        "Dalvik/2.1.0 (Linux; U; Android {}; {} Build/{})",
        os_version, handset.model, build_id
    );

    DeviceIdentity {
        id,
        profile: Some(DeviceProfile {
            manufacturer: "samsung".to_string(),
            model: handset.model.to_string(),
            name: handset.name.to_string(),
            os_version: os_version.to_string(),
            api_level: api_level.to_string(),
            android_id,
            build_id,
            user_agent,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_machine_identity_is_deterministic() {
        let a = machine_identity();
        let b = machine_identity();
        assert_eq!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_machine_fingerprint_feeds_uuid_v5() {
        let fingerprint = machine_fingerprint("build-01", "x86_64", "linux");
        assert_eq!(fingerprint, "build-01-x86_64-linux");
        let id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, fingerprint.as_bytes());
        assert_eq!(id.get_version_num(), 5);
    }

    #[test]
    fn test_first_call_creates_file_then_reads() {
        let tmp = TempDir::new().unwrap();
        let store = IdentityStore::new(tmp.path(), IdentityMode::Random);
        assert!(!store.path().exists());

        let first = store.get_or_create_device_id().unwrap();
        assert!(store.path().exists());

        let second = store.get_or_create_device_id().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_identity_is_returned_verbatim() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(IDENTITY_FILE);
        std::fs::write(&path, r#"{"id": "D1"}"#).unwrap();

        let store = IdentityStore::new(tmp.path(), IdentityMode::Machine);
        assert_eq!(store.get_or_create_device_id().unwrap().id, "D1");
    }

    #[test]
    fn test_plain_text_identity_is_accepted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(IDENTITY_FILE), "legacy-device-id\n").unwrap();

        let store = IdentityStore::new(tmp.path(), IdentityMode::Random);
        let identity = store.get_or_create_device_id().unwrap();
        assert_eq!(identity.id, "legacy-device-id");
        assert!(identity.profile.is_none());
    }

    #[test]
    fn test_empty_identity_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(IDENTITY_FILE), "   ").unwrap();

        let store = IdentityStore::new(tmp.path(), IdentityMode::Random);
        assert!(matches!(
            store.get_or_create_device_id(),
            Err(AuthError::Persistence(_))
        ));
    }

    #[test]
    fn test_unwritable_location_is_fatal() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the data directory should be
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let store = IdentityStore::new(&blocker, IdentityMode::Random);
        assert!(matches!(
            store.get_or_create_device_id(),
            Err(AuthError::Persistence(_))
        ));
    }

    #[test]
    fn test_create_leaves_only_identity_file() {
        let tmp = TempDir::new().unwrap();
        let store = IdentityStore::new(tmp.path(), IdentityMode::Handset);
        let created = store.get_or_create_device_id().unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(IDENTITY_FILE)]);

        let on_disk: DeviceIdentity =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk, created);
    }

    #[test]
    fn test_leftover_temp_file_does_not_block_creation() {
        let tmp = TempDir::new().unwrap();
        // What an interrupted write leaves behind: a partial temp file, no identity file
        std::fs::write(tmp.path().join(".tmpA1b2C3"), "{\n  \"id\": \"3f2a").unwrap();

        let store = IdentityStore::new(tmp.path(), IdentityMode::Random);
        let first = store.get_or_create_device_id().unwrap();
        let second = store.get_or_create_device_id().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_handset_identity_shape() {
        let identity = handset_identity();
        assert_eq!(identity.id.len(), 20);
        let profile = identity.profile.unwrap();
        assert_eq!(profile.android_id.len(), 16);
        assert!(profile.android_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(profile.user_agent.starts_with("Dalvik/2.1.0 (Linux; U; Android "));
        assert!(profile.user_agent.contains(&profile.model));
    }

    #[test]
    fn test_handset_identity_persists_profile() {
        let tmp = TempDir::new().unwrap();
        let store = IdentityStore::new(tmp.path(), IdentityMode::Handset);
        let created = store.get_or_create_device_id().unwrap();
        let reloaded = store.get_or_create_device_id().unwrap();
        assert_eq!(created, reloaded);
        assert!(reloaded.profile.is_some());
    }
}
