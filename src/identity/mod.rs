//! Read access to the user identity records that usernames are checked against.

#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
mod memory;

#[cfg(feature = "dashmap")]
pub use memory::{InMemoryIdentityStore, InsertError};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";

/// A stored user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    /// Normalized username, if the user picked one.
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl UserIdentity {
    /// The identity's role, where a missing role reads as [USER_ROLE].
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(USER_ROLE)
    }
}

/// Failure of the underlying identity store.
#[derive(Debug, Error)]
#[error("Identity store error: {0}")]
pub struct StoreError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(error.into())
    }
}

/// Lookup of identities by their normalized name.
///
/// Implementations are expected to answer from an index rather than scanning every record.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Finds the identity whose name equals `normalized`.
    ///
    /// The argument is already trimmed and lowercased.
    async fn find_by_name(&self, normalized: &str) -> Result<Option<UserIdentity>, StoreError>;
}

#[async_trait]
impl<T> IdentityStore for Arc<T>
where
    T: IdentityStore + ?Sized,
{
    async fn find_by_name(&self, normalized: &str) -> Result<Option<UserIdentity>, StoreError> {
        (**self).find_by_name(normalized).await
    }
}
