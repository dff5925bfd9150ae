//! Persistence layers that never touch the filesystem

use std::sync::Mutex;

use async_trait::async_trait;

use super::{PersistedSession, SessionPersistence};
use crate::error::PersistenceError;

/// Keeps the session record in memory
///
/// Survives nothing but is useful wherever a real store is not wanted, and for
/// observing what the session would have written.
#[derive(Debug, Default)]
pub struct InMemorySessionPersistence {
    record: Mutex<Option<PersistedSession>>,
}

impl InMemorySessionPersistence {
    /// Constructs an empty in-memory store
    pub const fn new() -> Self {
        Self {
            record: Mutex::new(None),
        }
    }

    /// Constructs a store that already holds `record`
    pub fn with_record(record: PersistedSession) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    /// A copy of the currently stored record
    pub fn current(&self) -> Option<PersistedSession> {
        match self.record.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, value: Option<PersistedSession>) {
        match self.record.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

#[async_trait]
impl SessionPersistence for InMemorySessionPersistence {
    async fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        Ok(self.current())
    }

    async fn persist(&self, session: &PersistedSession) -> Result<(), PersistenceError> {
        self.replace(Some(session.clone()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.replace(None);
        Ok(())
    }
}

/// Discards every write and never has anything to load
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPersistence;

#[async_trait]
impl SessionPersistence for NoPersistence {
    async fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        Ok(None)
    }

    async fn persist(&self, _: &PersistedSession) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
