//! Durable storage for the session's token pair
//!
//! Only the token pair and the "remember me" preference are ever written.
//! Everything else about a session is derived from the access token on load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::PersistenceError, TokenRecord};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileSessionPersistence;
pub use in_memory::{InMemorySessionPersistence, NoPersistence};

/// The record written to durable storage
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// The token pair
    pub tokens: TokenRecord,
    /// Whether the user asked to stay signed in across restarts
    #[serde(default)]
    pub remember_me: bool,
}

/// An asynchronous, durable home for the session record
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Loads the stored record, if there is one
    async fn load(&self) -> Result<Option<PersistedSession>, PersistenceError>;

    /// Replaces the stored record
    async fn persist(&self, session: &PersistedSession) -> Result<(), PersistenceError>;

    /// Removes the stored record
    ///
    /// Clearing storage that holds nothing succeeds.
    async fn clear(&self) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<P: SessionPersistence + ?Sized> SessionPersistence for std::sync::Arc<P> {
    async fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        (**self).load().await
    }

    async fn persist(&self, session: &PersistedSession) -> Result<(), PersistenceError> {
        (**self).persist(session).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        (**self).clear().await
    }
}
