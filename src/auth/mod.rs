//! Authentication and authorization.
//!
//! - `credentials`: immutable credential store and salted secret hashing
//! - `authenticator`: verifies HTTP Basic credentials into an `AuthContext`
//! - `authorize`: role policy checks applied by the Gateway

pub mod authenticator;
pub mod authorize;
pub mod credentials;

pub use authenticator::{AuthContext, Authenticator, Credential};
pub use authorize::{Policy, authorize};
pub use credentials::{CredentialStore, Identity, Role, hash_secret, verify_secret};
