#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use custos_clock::UnixTime;
use thiserror::Error;
use tokio::sync::Notify;

use crate::{
    backend::{AuthBackend, Credentials, Registration},
    token_clock::encode_segment,
    AccessToken, EmailRef, PasswordRef, RefreshToken, RefreshTokenRef, ResetTokenRef, TokenPair,
};

/// Builds an unsigned JWT carrying `claims`
pub(crate) fn jwt(claims: serde_json::Value) -> AccessToken {
    AccessToken::new(format!(
        "{}.{}.{}",
        encode_segment(br#"{"alg":"HS256","typ":"JWT"}"#),
        encode_segment(claims.to_string().as_bytes()),
        encode_segment(b"signature"),
    ))
}

pub(crate) fn pair_expiring_at(exp: UnixTime) -> TokenPair {
    pair_for("1", &["user"], exp, "refresh-1")
}

pub(crate) fn pair_for(sub: &str, roles: &[&str], exp: UnixTime, refresh: &str) -> TokenPair {
    TokenPair::new(
        jwt(serde_json::json!({
            "sub": sub,
            "email": format!("user{}@example.com", sub),
            "roles": roles,
            "exp": exp.0,
        })),
        RefreshToken::new(refresh.to_owned()),
    )
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub(crate) struct FakeError(pub String);

type Scripted = Result<TokenPair, FakeError>;

/// A backend whose responses are queued up front and whose refresh calls can
/// be held open until released
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    logins: Mutex<VecDeque<Scripted>>,
    refreshes: Mutex<VecDeque<Scripted>>,
    logout_fails: Mutex<bool>,
    pub(crate) login_calls: AtomicUsize,
    pub(crate) register_calls: AtomicUsize,
    pub(crate) refresh_calls: AtomicUsize,
    pub(crate) logout_calls: AtomicUsize,
    pub(crate) forgot_calls: AtomicUsize,
    pub(crate) reset_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    refresh_started: Arc<Notify>,
}

impl FakeBackend {
    pub(crate) fn push_login(&self, result: Scripted) {
        self.logins.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_refresh(&self, result: Scripted) {
        self.refreshes.lock().unwrap().push_back(result);
    }

    pub(crate) fn fail_logout(&self) {
        *self.logout_fails.lock().unwrap() = true;
    }

    /// Holds every refresh open until the returned handle is notified
    pub(crate) fn hold_refreshes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a refresh call has reached the backend
    pub(crate) async fn refresh_started(&self) {
        self.refresh_started.notified().await
    }

    pub(crate) fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    type Error = FakeError;

    async fn login(&self, _credentials: &Credentials) -> Result<TokenPair, Self::Error> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FakeError("no scripted login".into())))
    }

    async fn register(&self, _registration: &Registration) -> Result<TokenPair, Self::Error> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FakeError("no scripted registration".into())))
    }

    async fn refresh(&self, _refresh_token: &RefreshTokenRef) -> Result<TokenPair, Self::Error> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_started.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FakeError("no scripted refresh".into())))
    }

    async fn logout(&self, _tokens: &TokenPair) -> Result<(), Self::Error> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if *self.logout_fails.lock().unwrap() {
            Err(FakeError("server unreachable".into()))
        } else {
            Ok(())
        }
    }

    async fn forgot_password(&self, _email: &EmailRef) -> Result<(), Self::Error> {
        self.forgot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_password(
        &self,
        token: &ResetTokenRef,
        _new_password: &PasswordRef,
    ) -> Result<(), Self::Error> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if token.as_str() == "expired" {
            Err(FakeError("Reset link has expired".into()))
        } else {
            Ok(())
        }
    }
}
