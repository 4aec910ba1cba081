//! Role-based authorization
//!
//! Role matching is exact. A route that admits both users and admins says so
//! explicitly through its `Policy`.

use log::warn;

use super::authenticator::AuthContext;
use super::credentials::Role;
use crate::error::{OcrError, Result};

/// Require exactly `required`
pub fn authorize(context: &AuthContext, required: Role) -> Result<()> {
    if context.role == required {
        return Ok(());
    }
    warn!(
        "Forbidden: user {} with role {} needs {}",
        context.username, context.role, required
    );
    Err(OcrError::Forbidden(format!("User does not have {} privileges", required)))
}

/// Set of roles admitted by a route
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    allowed: &'static [Role],
}

impl Policy {
    /// Prediction is open to every authenticated role
    pub const PREDICT: Policy = Policy {
        allowed: &[Role::User, Role::Admin],
    };

    /// Retraining and stage triggers are admin-only
    pub const ADMIN_ONLY: Policy = Policy {
        allowed: &[Role::Admin],
    };

    pub const fn new(allowed: &'static [Role]) -> Self {
        Self { allowed }
    }

    pub fn admits(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }

    /// Check a context against the policy
    pub fn check(&self, context: &AuthContext) -> Result<()> {
        if self.admits(context.role) {
            return Ok(());
        }
        match self.allowed {
            [only] => authorize(context, *only),
            _ => {
                warn!("Forbidden: user {} with role {}", context.username, context.role);
                Err(OcrError::Forbidden("Insufficient permissions".to_string()))
            }
        }
    }
}
