//! Candidate base URLs for the remote service
//!
//! The service has been seen under several hostnames. Candidates are probed one at
//! a time, in order: hitting every host at once trips the service's abuse detection.

use super::types::AuthError;
use log::{debug, info, warn};

/// Ordered base-URL candidates
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResolver {
    candidates: Vec<String>,
}

impl EndpointResolver {
    /// Build a resolver. Fails if no usable candidate is given.
    pub fn new<I, S>(candidates: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates: Vec<String> = candidates
            .into_iter()
            .map(|c| normalize_base_url(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();

        if candidates.is_empty() {
            return Err(AuthError::Configuration(
                "No endpoint candidates configured".to_string(),
            ));
        }

        Ok(Self { candidates })
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// The explicit override if given, otherwise the first candidate
    pub fn select(&self, explicit: Option<&str>) -> String {
        match explicit.map(normalize_base_url) {
            Some(url) if !url.is_empty() => url,
            _ => self.candidates[0].clone(),
        }
    }

    /// Call `attempt` with each candidate in order until one succeeds.
    ///
    /// Every kind of failure moves on to the next candidate. If all fail, the error
    /// from the last candidate is returned.
    pub fn try_each<T, F>(&self, mut attempt: F) -> Result<T, AuthError>
    where
        F: FnMut(&str) -> Result<T, AuthError>,
    {
        let total = self.candidates.len();
        let mut last_error = None;

        for (index, candidate) in self.candidates.iter().enumerate() {
            info!("Trying endpoint {}/{}: {}", index + 1, total, candidate);
            match attempt(candidate) {
                Ok(value) => {
                    info!("Endpoint accepted the request: {}", candidate);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Endpoint {} failed: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        debug!("All {} endpoint candidates failed", total);
        // `new` guarantees at least one candidate, so the loop ran
        Err(last_error.unwrap_or_else(|| AuthError::Configuration(
            "No endpoint candidates configured".to_string(),
        )))
    }
}

/// Trim whitespace and trailing slashes so paths can be appended directly
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
