//! Keyturn Core Library
//!
//! Client-side session lifecycle for a token-based HTTP API: a persistent
//! device identity, candidate endpoint probing, credential login, token
//! refresh and a single retry of requests rejected as unauthorized.

pub mod auth;
pub mod settings;
pub mod utils;

// Re-export commonly used items
pub use auth::{AuthError, AuthSessionManager, Credentials, SessionState, TokenPair};
pub use settings::{load_settings, save_settings, ClientSettings};
pub use utils::preview;

/// HTTP method type accepted by [`AuthSessionManager::authenticated_request`]
pub use reqwest::Method;
