//! An authority reached over HTTP with JSON bodies

use async_trait::async_trait;
use reqwest::{header, Response, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AuthBackend, Credentials, Registration};
use crate::{
    EmailRef, PasswordRef, RefreshTokenRef, ResetTokenRef, TokenPair, TokenRecord,
};

/// A backend that talks to the authority's `/auth` JSON endpoints
///
/// | operation         | request                                   |
/// |-------------------|-------------------------------------------|
/// | login             | `POST auth/login` `{email, password}`     |
/// | register          | `POST auth/register` `{email, password, full_name?}` |
/// | refresh           | `POST auth/refresh` `{refresh_token}`     |
/// | logout            | `POST auth/logout` with bearer access token |
/// | forgot password   | `POST auth/forgot-password` `{email}`     |
/// | reset password    | `POST auth/reset-password` `{token, new_password}` |
///
/// Token responses are `{access_token, refresh_token}`.
#[derive(Clone, Debug)]
pub struct HttpAuthBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAuthBackend {
    /// Constructs a backend rooted at `base_url`
    ///
    /// Endpoint paths are resolved relative to `base_url`, so a base of
    /// `https://example.com/api/` posts logins to `https://example.com/api/auth/login`.
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, path: &'static str) -> Result<Url, HttpBackendError> {
        self.base_url
            .join(path)
            .map_err(|source| HttpBackendError::Endpoint { path, source })
    }

    async fn post_for_tokens<P: Serialize + ?Sized>(
        &self,
        path: &'static str,
        payload: &P,
    ) -> Result<TokenPair, HttpBackendError> {
        let url = self.endpoint(path)?;
        let resp = send(self.client.post(url).json(payload)).await?;
        let resp = check_status(resp).await?;

        let body = resp.bytes().await.map_err(HttpBackendError::BodyRead)?;
        let record: TokenRecord = serde_json::from_slice(&body)?;
        let tokens = TokenPair::from(record);

        tracing::debug!(
            expires_at = tokens.expires_at().map(|t| t.0),
            "received token pair from authority"
        );

        Ok(tokens)
    }

    async fn post_unit(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(), HttpBackendError> {
        let resp = send(request).await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// An error while talking to the authority over HTTP
#[derive(Debug, Error)]
pub enum HttpBackendError {
    /// The authority refused the request
    ///
    /// Displays as the authority's own explanation.
    #[error("{detail}")]
    Rejected {
        /// The HTTP status returned
        status: u16,
        /// The `detail` field of the error body, or the raw body
        detail: String,
    },
    /// Unable to deserialize the token body
    #[error("unable to read the token response from the authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to send the request to the authority
    #[error("unable to reach the authentication server")]
    RequestSend(#[source] reqwest::Error),
    /// The endpoint URL could not be built from the base URL
    #[error("invalid endpoint '{path}'")]
    Endpoint {
        /// The relative path being resolved
        path: &'static str,
        /// The underlying parse error
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: ErrorDetail,
}

/// FastAPI reports either a plain message or a list of validation failures
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Message(String),
    Validation(Vec<ValidationIssue>),
}

#[derive(Debug, Deserialize)]
struct ValidationIssue {
    msg: String,
}

impl ErrorDetail {
    fn into_message(self) -> String {
        match self {
            ErrorDetail::Message(m) => m,
            ErrorDetail::Validation(issues) => issues
                .into_iter()
                .map(|i| i.msg)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Response, HttpBackendError> {
    let resp = request.send().await.map_err(HttpBackendError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received response from authority"
    );

    Ok(resp)
}

async fn check_status(resp: Response) -> Result<Response, HttpBackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.map_err(HttpBackendError::BodyRead)?;
    let detail = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.detail.into_message(),
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned(),
        Err(_) => body,
    };

    Err(HttpBackendError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a RefreshTokenRef,
}

#[derive(Serialize)]
struct ForgotPasswordRequest<'a> {
    email: &'a EmailRef,
}

#[derive(Serialize)]
struct ResetPasswordRequest<'a> {
    token: &'a ResetTokenRef,
    new_password: &'a PasswordRef,
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    type Error = HttpBackendError;

    #[tracing::instrument(err, skip(self, credentials), fields(email = %credentials.email))]
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, Self::Error> {
        self.post_for_tokens("auth/login", credentials).await
    }

    #[tracing::instrument(err, skip(self, registration), fields(email = %registration.email))]
    async fn register(&self, registration: &Registration) -> Result<TokenPair, Self::Error> {
        self.post_for_tokens("auth/register", registration).await
    }

    #[tracing::instrument(err, skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, Self::Error> {
        self.post_for_tokens("auth/refresh", &RefreshRequest { refresh_token })
            .await
    }

    #[tracing::instrument(err, skip(self, tokens))]
    async fn logout(&self, tokens: &TokenPair) -> Result<(), Self::Error> {
        let url = self.endpoint("auth/logout")?;
        let request = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, bearer(tokens))
            .json(&RefreshRequest {
                refresh_token: tokens.refresh_token(),
            });
        self.post_unit(request).await
    }

    #[tracing::instrument(err, skip(self, email))]
    async fn forgot_password(&self, email: &EmailRef) -> Result<(), Self::Error> {
        let url = self.endpoint("auth/forgot-password")?;
        self.post_unit(self.client.post(url).json(&ForgotPasswordRequest { email }))
            .await
    }

    #[tracing::instrument(err, skip(self, token, new_password))]
    async fn reset_password(
        &self,
        token: &ResetTokenRef,
        new_password: &PasswordRef,
    ) -> Result<(), Self::Error> {
        let url = self.endpoint("auth/reset-password")?;
        self.post_unit(
            self.client
                .post(url)
                .json(&ResetPasswordRequest { token, new_password }),
        )
        .await
    }
}

fn bearer(tokens: &TokenPair) -> header::HeaderValue {
    let raw = format!("Bearer {}", tokens.access_token().as_str());
    match header::HeaderValue::from_str(&raw) {
        Ok(mut value) => {
            value.set_sensitive(true);
            value
        }
        Err(_) => header::HeaderValue::from_static("Bearer"),
    }
}
