//! Caller identity and report access
//!
//! Identity lookup is a narrow collaborator: a bearer token maps to a user
//! id and a role. The role only gates report modes. Cross-project reports
//! need an admin, project reports need any known caller (or anonymous
//! access when enabled).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::ReportError;
use crate::report::ReportType;
use crate::types::Id;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May run cross-project reports
    Admin,
    /// Project reports only
    User,
}

/// Resolved caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Caller's user id (0 for anonymous)
    pub user_id: Id,
    /// Caller's role
    pub role: Role,
}

impl Identity {
    /// Anonymous caller
    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            role: Role::User,
        }
    }
}

/// Looks up the caller behind a request
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve a bearer token; `None` when the caller is unknown
    fn identify(&self, token: Option<&str>) -> Option<Identity>;
}

/// Static token table loaded from configuration
pub struct TokenIdentityProvider {
    tokens: RwLock<HashMap<String, Identity>>,
    allow_anonymous: bool,
}

impl TokenIdentityProvider {
    /// Empty table
    pub fn new(allow_anonymous: bool) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            allow_anonymous,
        }
    }

    /// Build the table from the `[auth]` section
    pub fn from_config(config: &AuthConfig) -> Self {
        let provider = Self::new(config.allow_anonymous);
        for entry in &config.tokens {
            provider.insert(
                entry.token.clone(),
                Identity {
                    user_id: entry.user_id,
                    role: entry.role,
                },
            );
        }
        provider
    }

    /// Register a token
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.write().insert(token.into(), identity);
    }

    /// Number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    /// No tokens registered
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

impl IdentityProvider for TokenIdentityProvider {
    fn identify(&self, token: Option<&str>) -> Option<Identity> {
        match token {
            Some(token) => {
                let found = self.tokens.read().get(token).cloned();
                if found.is_none() {
                    debug!("Unknown bearer token");
                }
                found
            }
            None if self.allow_anonymous => Some(Identity::anonymous()),
            None => None,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Check that the caller may run `report`
pub fn authorize(identity: Option<&Identity>, report: ReportType) -> Result<(), ReportError> {
    match identity {
        None => Err(ReportError::Unauthorized),
        Some(id) if report.is_cross_project() && id.role != Role::Admin => {
            Err(ReportError::Unauthorized)
        }
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportKind;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_anonymous_access() {
        let closed = TokenIdentityProvider::new(false);
        assert!(closed.identify(None).is_none());
        let open = TokenIdentityProvider::new(true);
        assert_eq!(open.identify(None), Some(Identity::anonymous()));
        // a wrong token is never anonymous
        assert!(open.identify(Some("nope")).is_none());
    }

    #[test]
    fn test_cross_project_needs_admin() {
        let provider = TokenIdentityProvider::new(false);
        provider.insert(
            "u",
            Identity {
                user_id: 2,
                role: Role::User,
            },
        );
        provider.insert(
            "a",
            Identity {
                user_id: 1,
                role: Role::Admin,
            },
        );
        assert_eq!(provider.len(), 2);

        let cross = ReportType::cross_project(ReportKind::TestExecution);
        let project = ReportType::project(ReportKind::TestExecution);
        let user = provider.identify(Some("u"));
        let admin = provider.identify(Some("a"));

        assert!(authorize(user.as_ref(), project).is_ok());
        assert!(matches!(
            authorize(user.as_ref(), cross),
            Err(ReportError::Unauthorized)
        ));
        assert!(authorize(admin.as_ref(), cross).is_ok());
        assert!(authorize(None, project).is_err());
    }
}
