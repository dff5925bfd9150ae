//! The authority's network operations, as consumed by the session
//!
//! The session never speaks a wire format itself. Each lifecycle operation is
//! delegated to an [`AuthBackend`], and the backend's error text is what the
//! user gets to see when an operation is refused.

use std::error;

use async_trait::async_trait;
use serde::Serialize;

use crate::{Email, EmailRef, Password, PasswordRef, RefreshTokenRef, ResetTokenRef, TokenPair};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use self::http::{HttpAuthBackend, HttpBackendError};

/// The network operations offered by an authentication authority
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The error type returned when an operation fails
    ///
    /// Its `Display` output is surfaced to the user verbatim.
    type Error: error::Error + Send + Sync + 'static;

    /// Exchanges credentials for a token pair
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, Self::Error>;

    /// Creates an account and returns its first token pair
    async fn register(&self, registration: &Registration) -> Result<TokenPair, Self::Error>;

    /// Exchanges a refresh token for a new token pair
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, Self::Error>;

    /// Informs the authority that the session has ended
    ///
    /// Callers treat this as best-effort.
    async fn logout(&self, tokens: &TokenPair) -> Result<(), Self::Error>;

    /// Requests that a password reset link be sent to `email`
    async fn forgot_password(&self, email: &EmailRef) -> Result<(), Self::Error>;

    /// Sets a new password using a reset token
    async fn reset_password(
        &self,
        token: &ResetTokenRef,
        new_password: &PasswordRef,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl<B: AuthBackend + ?Sized> AuthBackend for std::sync::Arc<B> {
    type Error = B::Error;

    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, Self::Error> {
        (**self).login(credentials).await
    }

    async fn register(&self, registration: &Registration) -> Result<TokenPair, Self::Error> {
        (**self).register(registration).await
    }

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, Self::Error> {
        (**self).refresh(refresh_token).await
    }

    async fn logout(&self, tokens: &TokenPair) -> Result<(), Self::Error> {
        (**self).logout(tokens).await
    }

    async fn forgot_password(&self, email: &EmailRef) -> Result<(), Self::Error> {
        (**self).forgot_password(email).await
    }

    async fn reset_password(
        &self,
        token: &ResetTokenRef,
        new_password: &PasswordRef,
    ) -> Result<(), Self::Error> {
        (**self).reset_password(token, new_password).await
    }
}

/// Tells the authority a session has ended, logging rather than returning any
/// failure
pub(crate) async fn logout_best_effort<B: AuthBackend + ?Sized>(backend: &B, tokens: &TokenPair) {
    match backend.logout(tokens).await {
        Ok(()) => tracing::debug!("authority acknowledged logout"),
        Err(error) => tracing::warn!(
            error = (&error as &dyn error::Error),
            "authority logout failed; local session already cleared"
        ),
    }
}

/// Email and password credentials
#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    /// The account's email address
    pub email: Email,
    /// The account's password
    pub password: Password,
}

impl Credentials {
    /// Constructs a new set of credentials
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Email::new(email.into()),
            password: Password::new(password.into()),
        }
    }
}

/// The details needed to create an account
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    /// The account's email address
    pub email: Email,
    /// The chosen password
    pub password: Password,
    /// The user's display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl Registration {
    /// Constructs a registration request without a display name
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Email::new(email.into()),
            password: Password::new(password.into()),
            full_name: None,
        }
    }

    /// Sets the user's display name
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_stay_out_of_debug_output() {
        let credentials = Credentials::new("ada@example.com", "correct horse");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("ada@example.com"));
        assert!(!debug.contains("correct horse"));

        let registration = Registration::new("ada@example.com", "correct horse")
            .with_full_name("Ada Lovelace");
        assert!(!format!("{:?}", registration).contains("correct horse"));
    }

    #[test]
    fn serialized_credentials_carry_the_password() {
        let credentials = Credentials::new("ada@example.com", "pw");
        let json = serde_json::to_value(&credentials).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "email": "ada@example.com", "password": "pw" })
        );

        let registration = Registration::new("ada@example.com", "pw");
        let json = serde_json::to_value(&registration).unwrap();
        assert!(json.get("full_name").is_none());
    }
}
