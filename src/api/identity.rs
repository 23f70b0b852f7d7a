//! Caller identity resolution
//!
//! The HTTP layer hands each request's bearer token to an
//! [`IdentityProvider`], which yields the resolved user id or an
//! Unauthorized error. The shipped implementation is a static token map
//! from configuration; a JWT-backed provider would slot in behind the
//! same trait.

use crate::config::AuthSettings;
use crate::error::{HermesError, Result};
use crate::types::UserId;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves a bearer token to a user id
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<UserId>;
}

/// Token map from the `[auth]` configuration section
pub struct StaticTokenIdentity {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.tokens.clone())
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn resolve(&self, token: &str) -> Result<UserId> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| HermesError::Unauthorized("Invalid tokens".to_string()))
    }
}
