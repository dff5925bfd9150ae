#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use custos_clock::UnixTime;
use custos_session::{
    backend::{Credentials, Registration},
    AccessToken, AuthBackend, EmailRef, PasswordRef, RefreshToken, RefreshTokenRef,
    ResetTokenRef, TokenPair,
};
use tokio::sync::Notify;

pub fn jwt(claims: serde_json::Value) -> AccessToken {
    AccessToken::new(format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(b"signature"),
    ))
}

pub fn tokens(sub: &str, roles: &[&str], exp: UnixTime, refresh: &str) -> TokenPair {
    TokenPair::new(
        jwt(serde_json::json!({
            "sub": sub,
            "email": format!("{}@example.com", sub),
            "roles": roles,
            "exp": exp.0,
        })),
        RefreshToken::new(refresh.to_owned()),
    )
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct Refusal(pub String);

/// An authority whose answers are scripted up front
#[derive(Debug, Default)]
pub struct ScriptedAuthority {
    logins: Mutex<VecDeque<Result<TokenPair, Refusal>>>,
    refreshes: Mutex<VecDeque<Result<TokenPair, Refusal>>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    refresh_started: Notify,
}

impl ScriptedAuthority {
    pub fn accepts_login(&self, tokens: TokenPair) {
        self.logins.lock().unwrap().push_back(Ok(tokens));
    }

    pub fn refuses_login(&self, message: &str) {
        self.logins
            .lock()
            .unwrap()
            .push_back(Err(Refusal(message.to_owned())));
    }

    pub fn accepts_refresh(&self, tokens: TokenPair) {
        self.refreshes.lock().unwrap().push_back(Ok(tokens));
    }

    pub fn refuses_refresh(&self, message: &str) {
        self.refreshes
            .lock()
            .unwrap()
            .push_back(Err(Refusal(message.to_owned())));
    }

    /// Holds refreshes open until the returned handle is notified
    pub fn hold_refreshes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub async fn refresh_started(&self) {
        self.refresh_started.notified().await
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for ScriptedAuthority {
    type Error = Refusal;

    async fn login(&self, _credentials: &Credentials) -> Result<TokenPair, Refusal> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Refusal("unexpected login".into())))
    }

    async fn register(&self, _registration: &Registration) -> Result<TokenPair, Refusal> {
        Err(Refusal("registration is closed".into()))
    }

    async fn refresh(&self, _refresh_token: &RefreshTokenRef) -> Result<TokenPair, Refusal> {
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
            .unwrap_or_else(|| Err(Refusal("unexpected refresh".into())))
    }

    async fn logout(&self, _tokens: &TokenPair) -> Result<(), Refusal> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn forgot_password(&self, _email: &EmailRef) -> Result<(), Refusal> {
        Ok(())
    }

    async fn reset_password(
        &self,
        _token: &ResetTokenRef,
        _new_password: &PasswordRef,
    ) -> Result<(), Refusal> {
        Ok(())
    }
}
