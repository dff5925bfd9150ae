//! Common errors

use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The access token could not be decoded into its claims
///
/// This never ends a session on its own. A token that cannot be decoded is
/// treated as due for refresh.
#[derive(Debug, Error)]
#[error("malformed access token")]
pub struct MalformedTokenError {
    #[source]
    source: Option<BoxError>,
}

pub(crate) fn malformed_token() -> MalformedTokenError {
    MalformedTokenError { source: None }
}

pub(crate) fn malformed_token_because(source: impl Into<BoxError>) -> MalformedTokenError {
    MalformedTokenError {
        source: Some(source.into()),
    }
}

/// A login, registration or password operation was refused
///
/// The display text is the message supplied by the authority, suitable for
/// showing to the user as-is.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AuthError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl AuthError {
    /// The human-readable reason for the failure
    pub fn message(&self) -> &str {
        &self.message
    }
}

pub(crate) fn auth_error(source: impl StdError + Send + Sync + 'static) -> AuthError {
    AuthError {
        message: source.to_string(),
        source: Some(Box::new(source)),
    }
}

pub(crate) fn auth_error_from_token(source: MalformedTokenError) -> AuthError {
    AuthError {
        message: String::from("the authority returned an unreadable access token"),
        source: Some(Box::new(source)),
    }
}

/// A token refresh did not produce a new access token
///
/// Every caller waiting on the same refresh receives a clone of the same
/// error.
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// There is no session whose tokens could be refreshed
    #[error("no authenticated session to refresh")]
    NotAuthenticated,
    /// The authority rejected the refresh token; the session has been ended
    #[error("refresh rejected: {message}")]
    Rejected {
        /// The message supplied by the authority
        message: String,
        /// The underlying error
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },
    /// The session ended, or a new one began, before the refresh settled
    #[error("session ended while the refresh was in flight")]
    Superseded,
    /// The refresh task stopped without reporting an outcome
    #[error("refresh was interrupted before it settled")]
    Interrupted,
}

pub(crate) fn refresh_rejected(source: impl StdError + Send + Sync + 'static) -> RefreshError {
    RefreshError::Rejected {
        message: source.to_string(),
        source: Arc::new(source),
    }
}

/// A session store transition was refused
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
pub enum TransitionError {
    /// Tokens cannot be replaced without an authenticated session
    #[error("no authenticated session")]
    NotAuthenticated,
    /// The session the change was computed for is no longer current
    #[error("session changed since the update was requested")]
    StaleSession,
}

/// Persisting or loading the durable session record failed
#[derive(Debug, Error)]
#[error("session persistence failed")]
pub struct PersistenceError {
    #[from]
    source: BoxError,
}

impl From<std::io::Error> for PersistenceError {
    fn from(source: std::io::Error) -> Self {
        Self {
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(source: serde_json::Error) -> Self {
        Self {
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("Incorrect email or password")]
    struct Refused;

    #[test]
    fn auth_error_surfaces_the_authority_message() {
        let err = auth_error(Refused);
        assert_eq!(err.message(), "Incorrect email or password");
        assert_eq!(err.to_string(), "Incorrect email or password");
        assert!(err.source().is_some());
    }

    #[test]
    fn refresh_errors_are_shareable() {
        let err = refresh_rejected(Refused);
        let copy = err.clone();
        assert!(matches!(copy, RefreshError::Rejected { ref message, .. } if message == "Incorrect email or password"));
        assert_eq!(err.to_string(), copy.to_string());
    }
}
