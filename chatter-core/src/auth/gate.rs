//! Per-call credential and role checks

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::Credentials;
use crate::model::{Identity, Role};
use crate::store::{ChatStore, StoreError};

/// Why a caller was refused
///
/// Each variant carries a distinct message the caller can tell apart.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credentials attached to the channel")]
    MissingCredentials,

    #[error("Invalid user")]
    UnknownUser,

    #[error("Invalid credential")]
    InvalidToken,

    #[error("Invalid permission")]
    InsufficientRole,

    /// The credential lookup itself failed; not an authentication outcome
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verifies credentials against the store and enforces roles
#[derive(Clone)]
pub struct AuthorizationGate {
    store: Arc<dyn ChatStore>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub fn has_credentials(credentials: Option<&Credentials>) -> bool {
        credentials.is_some()
    }

    /// Look up `credentials.username` and compare the token verbatim
    ///
    /// Blocks on the store.
    pub fn verify(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let stored = self
            .store
            .user_credential(&credentials.username)?
            .ok_or(AuthError::UnknownUser)?;

        if stored.token != credentials.token {
            debug!(uname = %credentials.username, "Token mismatch");
            return Err(AuthError::InvalidToken);
        }

        Ok(Identity {
            user_id: stored.user_id,
            username: stored.uname,
            role: Role::from_admin_flag(stored.admin),
        })
    }

    pub fn require_role(identity: &Identity, role: Role) -> Result<(), AuthError> {
        if identity.role.satisfies(role) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole)
        }
    }

    /// Full check for a permissioned call: presence, identity, then role
    pub fn authorize(&self, credentials: Option<&Credentials>, role: Role) -> Result<Identity, AuthError> {
        let credentials = credentials.ok_or(AuthError::MissingCredentials)?;
        let identity = self.verify(credentials)?;
        Self::require_role(&identity, role)?;
        Ok(identity)
    }
}
