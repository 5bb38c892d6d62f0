//! Authentication manager - handles login/refresh and the retry-on-expiry policy

use super::endpoints::EndpointResolver;
use super::http_client::AuthClient;
use super::identity::IdentityStore;
use super::signing::{signer_for, RequestSigner, SigningContext};
use super::storage::{SessionStore, StoredSession};
use super::types::{
    ApiResponse, AuthError, Credentials, DeviceIdentity, LoginRequest, RefreshRequest,
    SessionState, TokenPair,
};
use crate::settings::ClientSettings;
use crate::utils::preview;
use log::{debug, error, info, warn};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Owns the device identity, the session store and the current token pair.
///
/// Every operation blocks until its exchange (and at most one retry) completes.
/// Mutating calls take `&mut self`; a host sharing one manager across threads must
/// wrap it in a lock.
pub struct AuthSessionManager {
    state: SessionState,
    identity: DeviceIdentity,
    store: SessionStore,
    client: AuthClient,
    resolver: EndpointResolver,
    signer: Box<dyn RequestSigner>,
    base_url: String,
    /// Set when the base URL came from settings; a stored session must not move it
    base_url_pinned: bool,
    probe_timeout: Duration,
    request_timeout: Duration,
}

impl AuthSessionManager {
    /// Create a manager using the signing strategy named in `settings`.
    ///
    /// Fails if the device identity cannot be loaded or persisted.
    pub fn new(settings: &ClientSettings) -> Result<Self, AuthError> {
        let signer = signer_for(settings.signing, &settings.client_id);
        Self::with_signer(settings, signer)
    }

    /// Create a manager with an explicit signing strategy
    pub fn with_signer(
        settings: &ClientSettings,
        signer: Box<dyn RequestSigner>,
    ) -> Result<Self, AuthError> {
        info!("Initializing AuthSessionManager...");
        let data_dir = settings.resolve_data_dir()?;
        let resolver = EndpointResolver::new(&settings.endpoints)?;

        let identity = IdentityStore::new(&data_dir, settings.identity)
            .get_or_create_device_id()
            .map_err(|e| {
                error!("Device identity unavailable, refusing to continue: {}", e);
                e
            })?;

        let client = AuthClient::new(settings, &identity)?;
        let base_url = resolver.select(settings.base_url.as_deref());

        info!("  Data directory: {}", data_dir.display());
        info!("  Device ID: {}", identity.id);
        info!("  Base URL: {}", base_url);
        info!("  Signing: {}", signer.name());

        Ok(Self {
            state: SessionState::Unauthenticated,
            identity,
            store: SessionStore::new(&data_dir),
            client,
            resolver,
            signer,
            base_url,
            base_url_pinned: settings.base_url.is_some(),
            probe_timeout: settings.probe_timeout(),
            request_timeout: settings.request_timeout(),
        })
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    /// The held token pair, if any
    pub fn tokens(&self) -> Option<&TokenPair> {
        self.state.tokens()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn device_identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Adopt the stored session, if there is one.
    ///
    /// The loaded pair is trusted until the service rejects it; no request is made here.
    pub fn load_session(&mut self) -> Result<Option<TokenPair>, AuthError> {
        let stored = match self.store.load()? {
            Some(stored) => stored,
            None => {
                info!("No stored session found, user needs to log in");
                return Ok(None);
            }
        };

        if let Some(device_id) = &stored.device_id {
            if device_id != &self.identity.id {
                warn!(
                    "Stored session was issued to device {}, current device is {}",
                    device_id, self.identity.id
                );
            }
        }

        if !self.base_url_pinned {
            if let Some(base_url) = &stored.base_url {
                self.base_url = base_url.clone();
            }
        }

        info!("FOUND STORED SESSION!");
        info!("  Issued at: {}", stored.tokens.issued_at);
        info!("  Access token: {}", preview(&stored.tokens.access_token, 8));
        info!("  Base URL: {}", self.base_url);

        self.state = SessionState::Authenticated(stored.tokens.clone());
        Ok(Some(stored.tokens))
    }

    /// Sign in with credentials against `base_url_override` or the current base URL.
    ///
    /// Never retries; use [`try_all_endpoints`](Self::try_all_endpoints) to walk the candidates.
    pub fn login(
        &mut self,
        creds: &Credentials,
        base_url_override: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let base_url = match base_url_override {
            Some(url) => self.resolver.select(Some(url)),
            None => self.base_url.clone(),
        };
        self.login_at(creds, &base_url, self.request_timeout)
    }

    /// Try `login` against every candidate endpoint in order
    pub fn try_all_endpoints(&mut self, creds: &Credentials) -> Result<TokenPair, AuthError> {
        info!(
            "Trying all {} candidate endpoints...",
            self.resolver.candidates().len()
        );
        let resolver = self.resolver.clone();
        let timeout = self.probe_timeout;
        resolver
            .try_each(|base_url| self.login_at(creds, base_url, timeout))
            .map_err(|e| {
                error!("Failed to sign in on any endpoint: {}", e);
                e
            })
    }

    fn login_at(
        &mut self,
        creds: &Credentials,
        base_url: &str,
        timeout: Duration,
    ) -> Result<TokenPair, AuthError> {
        info!("Signing in user: {}", creds.email);
        debug!("  Device ID: {}", self.identity.id);
        debug!("  Endpoint: {}", base_url);

        let payload = to_payload(&LoginRequest {
            email: &creds.email,
            password: &creds.password,
            device_id: &self.identity.id,
            register_id: creds.register_id.as_deref(),
        })?;
        let signature = self
            .signer
            .sign(&payload, &SigningContext::now(&self.identity.id));

        let pair = self.client.login(base_url, &payload, &signature, timeout)?;

        self.base_url = base_url.to_string();
        self.adopt(pair.clone());
        info!("Sign in successful!");
        Ok(pair)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// On failure the session stays `Expired` and the caller has to log in again.
    pub fn refresh(&mut self) -> Result<TokenPair, AuthError> {
        let refresh_token = match self.state.tokens() {
            Some(pair) if !pair.refresh_token.is_empty() => pair.refresh_token.clone(),
            _ => {
                warn!("No refresh token available");
                return Err(AuthError::NoSession);
            }
        };

        info!("Refreshing access token...");
        let payload = to_payload(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;
        let signature = self
            .signer
            .sign(&payload, &SigningContext::now(&self.identity.id));

        match self.client.refresh(&self.base_url, &payload, &signature) {
            Ok(pair) => {
                self.adopt(pair.clone());
                Ok(pair)
            }
            Err(e) => {
                warn!("Token refresh failed, session is expired: {}", e);
                self.mark_expired();
                Err(match e {
                    AuthError::RefreshFailed(_) => e,
                    other => AuthError::RefreshFailed(other.to_string()),
                })
            }
        }
    }

    /// Call `{method} <base_url><path>` with the current bearer token.
    ///
    /// A 401 triggers exactly one refresh and, if it succeeds, exactly one reissue.
    pub fn authenticated_request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, AuthError> {
        let access_token = match self.state.tokens() {
            Some(pair) => pair.access_token.clone(),
            None => {
                warn!("No access token, please login first");
                return Err(AuthError::NoSession);
            }
        };

        let url = join_url(&self.base_url, path);
        let response = self
            .client
            .execute(method.clone(), &url, &access_token, body)?;

        if response.status != 401 {
            return into_result(response);
        }

        warn!("Access token rejected by {}, attempting one refresh...", url);
        self.mark_expired();
        let refreshed = match self.refresh() {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Refresh after 401 failed, giving up: {}", e);
                return Err(AuthError::SessionExpired);
            }
        };

        let retry = self
            .client
            .execute(method, &url, &refreshed.access_token, body)?;
        if retry.status == 401 {
            warn!("Request still unauthorized after refresh");
            self.mark_expired();
            return Err(AuthError::SessionExpired);
        }
        into_result(retry)
    }

    /// Forget the session in memory and on disk
    pub fn logout(&mut self) -> Result<(), AuthError> {
        info!("Logging out");
        self.state = SessionState::Unauthenticated;
        self.store.clear()?;
        info!("Logged out successfully");
        Ok(())
    }

    /// Make `pair` current and persist it. A storage failure is logged, not returned:
    /// the in-memory pair stays usable for this process.
    fn adopt(&mut self, pair: TokenPair) {
        let stored = StoredSession {
            tokens: pair.clone(),
            base_url: Some(self.base_url.clone()),
            device_id: Some(self.identity.id.clone()),
        };
        if let Err(e) = self.store.save(&stored) {
            warn!("Failed to store session (continuing with in-memory tokens): {}", e);
        }
        self.state = SessionState::Authenticated(pair);
    }

    fn mark_expired(&mut self) {
        self.state = match std::mem::take(&mut self.state) {
            SessionState::Authenticated(pair) | SessionState::Expired(pair) => {
                SessionState::Expired(pair)
            }
            SessionState::Unauthenticated => SessionState::Unauthenticated,
        };
    }
}

fn to_payload<T: Serialize>(body: &T) -> Result<Value, AuthError> {
    serde_json::to_value(body)
        .map_err(|e| AuthError::Configuration(format!("Failed to encode request body: {}", e)))
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, AuthError> {
    if response.is_success() {
        Ok(response)
    } else {
        error!(
            "Request failed: {} - {}",
            response.status,
            preview(&response.body, 200)
        );
        Err(AuthError::RequestFailed {
            status: response.status,
            body: response.body,
        })
    }
}

/// Append `path` to `base_url`, inserting a `/` if `path` lacks one
fn join_url(base_url: &str, path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        format!("{}{}", base_url, path)
    } else {
        format!("{}/{}", base_url, path)
    }
}
