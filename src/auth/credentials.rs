//! Credential store and secret hashing.
//!
//! Secrets are stored as argon2 PHC strings
//! (`$argon2id$v=19$m=...,t=...,p=...$<salt>$<hash>`). The store is built once
//! from configuration and never mutated afterwards.

use std::collections::HashMap;
use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::UserEntry;
use crate::error::{OcrError, Result};

/// Memory cost in KiB used by `hash_secret`.
pub const DEFAULT_MEMORY_KIB: u32 = Params::DEFAULT_M_COST;

/// Time cost (passes) used by `hash_secret`.
pub const DEFAULT_TIME_COST: u32 = Params::DEFAULT_T_COST;

/// Smallest memory cost argon2 accepts for a single lane.
pub const MIN_MEMORY_KIB: u32 = Params::MIN_M_COST;

const SALT_LEN: usize = 16;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parse a role name as carried in the role header
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known user
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub secret_hash: String,
    pub role: Role,
}

/// Immutable table of identities keyed by username
#[derive(Debug, Clone)]
pub struct CredentialStore {
    users: HashMap<String, Identity>,
    /// Checked when the username is unknown so both failure paths cost the same
    dummy_hash: String,
}

impl CredentialStore {
    /// Build a store, rejecting duplicate usernames and malformed hashes
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Result<Self> {
        let mut users = HashMap::new();
        let mut dummy_params = None;
        for identity in identities {
            let params = hash_params(&identity.secret_hash).ok_or_else(|| {
                OcrError::Config(format!("malformed secret_hash for user '{}'", identity.username))
            })?;
            if users.contains_key(&identity.username) {
                return Err(OcrError::Config(format!("duplicate username '{}'", identity.username)));
            }
            dummy_params.get_or_insert(params);
            users.insert(identity.username.clone(), identity);
        }

        // No users means nothing to enumerate, so the cheapest cost will do
        let dummy_params = match dummy_params {
            Some(params) => params,
            None => cost_params(MIN_MEMORY_KIB, 1)?,
        };
        let dummy_secret: [u8; SALT_LEN] = rand::rng().random();
        let dummy_hash = hash_with_params(&hex::encode(dummy_secret), dummy_params)?;
        Ok(Self { users, dummy_hash })
    }

    /// Build a store from the `users` configuration section
    pub fn from_config(entries: &[UserEntry]) -> Result<Self> {
        Self::new(entries.iter().map(|e| Identity {
            username: e.username.clone(),
            secret_hash: e.secret_hash.clone(),
            role: e.role,
        }))
    }

    pub fn get(&self, username: &str) -> Option<&Identity> {
        self.users.get(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Hash used to equalize work for unknown usernames
    pub(crate) fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}

/// Cost parameters of an argon2 PHC string, `None` for anything else
fn hash_params(encoded: &str) -> Option<Params> {
    let parsed = PasswordHash::new(encoded).ok()?;
    Algorithm::new(parsed.algorithm.as_str()).ok()?;
    parsed.hash.as_ref()?;
    Params::try_from(&parsed).ok()
}

fn hash_with_params(secret: &str, params: Params) -> Result<String> {
    let salt_bytes: [u8; SALT_LEN] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| OcrError::Config(format!("failed to encode salt: {}", e)))?;
    let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| OcrError::Config(format!("failed to hash secret: {}", e)))?;
    Ok(hash.to_string())
}

/// Hash a secret with the default argon2id cost and a fresh random salt
pub fn hash_secret(secret: &str) -> Result<String> {
    hash_secret_with(secret, DEFAULT_MEMORY_KIB, DEFAULT_TIME_COST)
}

/// Hash a secret with explicit memory (KiB) and time costs
pub fn hash_secret_with(secret: &str, memory_kib: u32, time_cost: u32) -> Result<String> {
    hash_with_params(secret, cost_params(memory_kib, time_cost)?)
}

fn cost_params(memory_kib: u32, time_cost: u32) -> Result<Params> {
    Params::new(memory_kib, time_cost, Params::DEFAULT_P_COST, None)
        .map_err(|e| OcrError::Config(format!("invalid hash cost: {}", e)))
}

/// Verify a secret against a PHC string. Malformed hashes never verify.
pub fn verify_secret(secret: &str, encoded: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded) else {
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}
