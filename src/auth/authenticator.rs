//! HTTP Basic authentication against the credential store

use std::sync::Arc;

use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose::STANDARD};
use log::{debug, warn};

use super::credentials::{CredentialStore, Role, verify_secret};
use crate::error::{OcrError, Result};

/// Message shared by every authentication failure.
pub const INVALID_CREDENTIALS: &str = "Incorrect username or password";

/// A presented credential
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Extract a Basic credential from the Authorization header
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get("Authorization")?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, secret) = decoded.split_once(':')?;
        Some(Self::new(username, secret))
    }

    /// Encode as an Authorization header value
    pub fn to_header_value(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.username, self.secret)))
    }
}

/// Identity of an authenticated caller, valid for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub username: String,
    pub role: Role,
}

/// Verifies credentials against an immutable store
#[derive(Debug, Clone)]
pub struct Authenticator {
    store: Arc<CredentialStore>,
}

impl Authenticator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// Verify a credential.
    ///
    /// Unknown usernames and wrong secrets fail with the same error after the
    /// same amount of hashing work.
    pub fn authenticate(&self, credential: &Credential) -> Result<AuthContext> {
        let (hash, identity) = match self.store.get(&credential.username) {
            Some(identity) => (identity.secret_hash.as_str(), Some(identity)),
            None => (self.store.dummy_hash(), None),
        };

        let verified = verify_secret(&credential.secret, hash);

        match identity {
            Some(identity) if verified => {
                debug!("Authenticated user: {}, role: {}", identity.username, identity.role);
                Ok(AuthContext {
                    username: identity.username.clone(),
                    role: identity.role,
                })
            }
            _ => {
                warn!("Rejected credentials for user: {}", credential.username);
                Err(OcrError::Unauthorized(INVALID_CREDENTIALS.to_string()))
            }
        }
    }

    /// Authenticate the Basic credential carried in request headers
    pub fn authenticate_headers(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let credential = Credential::from_headers(headers).ok_or_else(|| {
            warn!("Request without a usable Authorization header");
            OcrError::Unauthorized(INVALID_CREDENTIALS.to_string())
        })?;
        self.authenticate(&credential)
    }
}
