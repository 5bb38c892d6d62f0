//! Authentication module
//!
//! Device identity, endpoint selection, token persistence and the
//! login/refresh/retry session lifecycle.

pub mod endpoints;
pub mod http_client;
pub mod identity;
pub mod manager;
pub mod signing;
pub mod storage;
pub mod types;

pub use endpoints::EndpointResolver;
pub use identity::{IdentityMode, IdentityStore};
pub use manager::AuthSessionManager;
pub use signing::{PayloadDigest, RequestSigner, SigningContext, SigningMode, Unsigned};
pub use storage::{SessionStore, StoredSession};
pub use types::*;
