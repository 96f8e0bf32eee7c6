//! Identity lookups for LDAP-typed fields.
//!
//! Validation only needs one question answered: is this a known identity?
//! The trait keeps the directory integration out of the engine; transient
//! lookup failures are surfaced distinctly so callers can retry instead of
//! rejecting a value that might be fine.

use async_trait::async_trait;
use thiserror::Error;

/// Lookup failure that says nothing about the identity's validity.
#[derive(Debug, Clone, Error)]
#[error("identity lookup failed: {0}")]
pub struct IdentityLookupError(pub String);

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// True when `name` is a known identity.
    async fn is_valid_identity(&self, name: &str) -> Result<bool, IdentityLookupError>;
}

/// Fixed-roster identity service for tests and local development.
#[cfg(feature = "mock")]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    pub struct StaticIdentityService {
        known: HashSet<String>,
        unavailable: AtomicBool,
    }

    impl StaticIdentityService {
        pub fn with_users<I, S>(users: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                known: users.into_iter().map(Into::into).collect(),
                unavailable: AtomicBool::new(false),
            }
        }

        /// Makes subsequent lookups fail, simulating a directory outage.
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IdentityService for StaticIdentityService {
        async fn is_valid_identity(&self, name: &str) -> Result<bool, IdentityLookupError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(IdentityLookupError("directory unreachable".to_string()));
            }
            Ok(self.known.contains(name))
        }
    }

}
