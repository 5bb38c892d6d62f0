//! Blocking HTTP client for the remote service

use super::types::{ApiResponse, AuthError, DeviceIdentity, TokenPair, TokenResponse};
use crate::settings::ClientSettings;
use crate::utils::preview;
use log::{debug, error, info};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// How much of an error body is kept in `Unreachable` causes
const ERROR_BODY_PREVIEW: usize = 200;

/// HTTP client for login, refresh and authenticated calls
pub struct AuthClient {
    client: Client,
    login_path: String,
    refresh_path: String,
    request_timeout: Duration,
}

impl AuthClient {
    /// Create a client carrying the app and device headers on every request
    pub fn new(settings: &ClientSettings, identity: &DeviceIdentity) -> Result<Self, AuthError> {
        let headers = default_headers(settings, identity)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            login_path: settings.login_path.clone(),
            refresh_path: settings.refresh_path.clone(),
            request_timeout: settings.request_timeout(),
        })
    }

    /// POST credentials to `<base_url><login_path>`
    pub fn login(
        &self,
        base_url: &str,
        payload: &Value,
        signature: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<TokenPair, AuthError> {
        let url = format!("{}{}", base_url, self.login_path);
        debug!("POST {} (timeout {:?})", url, timeout);

        let request = with_headers(self.client.post(&url).timeout(timeout).json(payload), signature);
        let response = request.send().map_err(|e| {
            error!("Login request to {} failed: {}", url, e);
            AuthError::transport(e)
        })?;

        let status = response.status();
        debug!("Login response status: {}", status);

        if status == reqwest::StatusCode::UNAUTHORIZED {
            error!("Login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        }

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!("Login failed: {} - {}", status, preview(&body, ERROR_BODY_PREVIEW));
            return Err(AuthError::Unreachable {
                status: Some(status.as_u16()),
                cause: preview(&body, ERROR_BODY_PREVIEW),
            });
        }

        let body = response.text().map_err(|e| {
            error!("Reading login response from {} failed: {}", url, e);
            AuthError::transport(e)
        })?;

        let pair = parse_token_pair(&body)?.ok_or_else(|| {
            error!("Login succeeded but the response carried no token pair");
            AuthError::MalformedResponse("Login response carried no token pair".to_string())
        })?;

        info!("Login accepted by {}", base_url);
        Ok(pair)
    }

    /// POST the refresh token to `<base_url><refresh_path>`. Every failure is `RefreshFailed`.
    pub fn refresh(
        &self,
        base_url: &str,
        payload: &Value,
        signature: &[(&'static str, String)],
    ) -> Result<TokenPair, AuthError> {
        let url = format!("{}{}", base_url, self.refresh_path);
        debug!("POST {}", url);

        let request = with_headers(
            self.client.post(&url).timeout(self.request_timeout).json(payload),
            signature,
        );
        let response = request.send().map_err(|e| {
            error!("Refresh request to {} failed: {}", url, e);
            AuthError::RefreshFailed(format!("network error: {}", e))
        })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!("Refresh token failed: {} - {}", status, preview(&body, ERROR_BODY_PREVIEW));
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                preview(&body, ERROR_BODY_PREVIEW)
            )));
        }

        let body = response.text().map_err(|e| {
            error!("Reading refresh response from {} failed: {}", url, e);
            AuthError::RefreshFailed(format!("network error: {}", e))
        })?;

        let pair = parse_token_pair(&body)
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?
            .ok_or_else(|| {
                AuthError::RefreshFailed("Refresh response carried no token pair".to_string())
            })?;

        info!("Token refresh successful");
        Ok(pair)
    }

    /// Send `{method} <url>` with a bearer token. Any HTTP status is returned as-is.
    pub fn execute(
        &self,
        method: Method,
        url: &str,
        access_token: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, AuthError> {
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, format!("Bearer {}", access_token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().map_err(|e| {
            error!("{} {} failed: {}", method, url, e);
            AuthError::transport(e)
        })?;

        let status = response.status().as_u16();
        // A body cut short is a transport failure even after a 2xx status line
        let body = response.text().map_err(|e| {
            error!("Reading {} {} response failed: {}", method, url, e);
            AuthError::transport(e)
        })?;
        debug!("{} {} -> {}", method, url, status);

        Ok(ApiResponse { status, body })
    }
}

fn with_headers(mut request: RequestBuilder, headers: &[(&'static str, String)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    request
}

fn parse_token_pair(body: &str) -> Result<Option<TokenPair>, AuthError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::MalformedResponse(format!("Failed to parse response: {}", e)))?;
    Ok(response.into_pair())
}

fn default_headers(
    settings: &ClientSettings,
    identity: &DeviceIdentity,
) -> Result<HeaderMap, AuthError> {
    let user_agent = identity
        .profile
        .as_ref()
        .map(|p| p.user_agent.as_str())
        .unwrap_or(settings.user_agent.as_str());

    let mut pairs: Vec<(HeaderName, &str)> = vec![
        (USER_AGENT, user_agent),
        (ACCEPT, "application/json"),
        (HeaderName::from_static("x-app-version"), settings.app_version.as_str()),
        (HeaderName::from_static("x-platform"), settings.platform.as_str()),
        (HeaderName::from_static("x-device-id"), identity.id.as_str()),
    ];

    if let Some(profile) = &identity.profile {
        pairs.push((HeaderName::from_static("x-device-type"), "mobile"));
        pairs.push((HeaderName::from_static("x-device-model"), profile.model.as_str()));
        pairs.push((HeaderName::from_static("x-device-manufacturer"), profile.manufacturer.as_str()));
        pairs.push((HeaderName::from_static("x-os-version"), profile.os_version.as_str()));
        pairs.push((HeaderName::from_static("x-android-id"), profile.android_id.as_str()));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value).map_err(|e| {
            AuthError::Configuration(format!("Invalid value for header {}: {}", name, e))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::DeviceProfile;

    fn identity(profile: Option<DeviceProfile>) -> DeviceIdentity {
        DeviceIdentity {
            id: "D1".to_string(),
            profile,
        }
    }

    #[test]
    fn test_default_headers_without_profile() {
        let settings = ClientSettings::default();
        let headers = default_headers(&settings, &identity(None)).unwrap();
        assert_eq!(headers[USER_AGENT], settings.user_agent.as_str());
        assert_eq!(headers["x-device-id"], "D1");
        assert_eq!(headers["x-platform"], "Android");
        assert!(headers.get("x-device-model").is_none());
    }

    #[test]
    fn test_profile_overrides_user_agent() {
        let profile = DeviceProfile {
            manufacturer: "samsung".to_string(),
            model: "SM-A525F".to_string(),
            name: "Samsung Galaxy A52".to_string(),
            os_version: "12".to_string(),
            api_level: "31".to_string(),
            android_id: "0123456789abcdef".to_string(),
            build_id: "S.123456.789".to_string(),
            user_agent: "Dalvik/2.1.0 (Linux; U; Android 12; SM-A525F Build/S.123456.789)"
                .to_string(),
        };
        let headers = default_headers(&ClientSettings::default(), &identity(Some(profile))).unwrap();
        assert!(headers[USER_AGENT].to_str().unwrap().starts_with("Dalvik/2.1.0"));
        assert_eq!(headers["x-device-model"], "SM-A525F");
        assert_eq!(headers["x-android-id"], "0123456789abcdef");
    }

    #[test]
    fn test_invalid_header_value_is_configuration_error() {
        let settings = ClientSettings {
            app_version: "4.0\n3".to_string(),
            ..ClientSettings::default()
        };
        assert!(matches!(
            default_headers(&settings, &identity(None)),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_token_pair_rejects_non_json() {
        assert!(matches!(
            parse_token_pair("<html>maintenance</html>"),
            Err(AuthError::MalformedResponse(_))
        ));
        assert!(parse_token_pair(r#"{"ok": true}"#).unwrap().is_none());
    }
}
