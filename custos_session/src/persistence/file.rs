//! A session record kept in a local file

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{PersistedSession, SessionPersistence};
use crate::error::PersistenceError;

/// Stores the session record as JSON in a local file
///
/// On unix the file is created readable by its owner only.
#[derive(Debug)]
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    /// Constructs a file store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_record(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let record = serde_json::from_str(&data)?;
        Ok(Some(record))
    }

    async fn write_record(&self, record: &PersistedSession) -> Result<(), PersistenceError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(record)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionPersistence for FileSessionPersistence {
    async fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        self.read_record().await
    }

    async fn persist(&self, session: &PersistedSession) -> Result<(), PersistenceError> {
        self.write_record(session).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccessToken, RefreshToken, TokenRecord};

    fn record(remember_me: bool) -> PersistedSession {
        PersistedSession {
            tokens: TokenRecord {
                access_token: AccessToken::from_static("a.b.c"),
                refresh_token: RefreshToken::from_static("refresh"),
            },
            remember_me,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionPersistence::new(dir.path().join("session.json"));

        assert_eq!(store.load().await.unwrap(), None);
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSessionPersistence::new(&path);

        store.persist(&record(false)).await.unwrap();
        store.persist(&record(true)).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(record(true)));

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_its_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        FileSessionPersistence::new(&path)
            .persist(&record(true))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        assert!(FileSessionPersistence::new(&path).load().await.is_err());
    }
}
