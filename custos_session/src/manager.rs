//! The session façade
//!
//! [`SessionManager`] is the only component that calls the authority. It
//! drives the store through its transitions and hands token refresh off to the
//! [`RefreshCoordinator`].

use std::{
    fmt,
    sync::{Arc, Weak},
};

use custos_clock::{Clock, System};
use tokio::sync::watch;

use crate::{
    backend::{logout_best_effort, AuthBackend, Credentials, Registration},
    background::{self, BackgroundRefresh},
    error::{auth_error, auth_error_from_token, AuthError, RefreshError},
    guard::AuthorizationGuard,
    persistence::{InMemorySessionPersistence, SessionPersistence},
    refresh::RefreshCoordinator,
    store::{SessionSnapshot, SessionStore},
    AccessToken, EmailRef, PasswordRef, ResetTokenRef, SessionConfig, TokenPair, UserIdentity,
};

/// Manages the lifecycle of the client's single authenticated session
///
/// Cloning is cheap; every clone manages the same session.
pub struct SessionManager<B, C = System> {
    inner: Arc<Inner<B, C>>,
}

struct Inner<B, C> {
    store: Arc<SessionStore>,
    backend: Arc<B>,
    refresh: RefreshCoordinator<B, C>,
    config: SessionConfig,
}

impl<B, C> Clone for SessionManager<B, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B, C: fmt::Debug> fmt::Debug for SessionManager<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store)
            .field("refresh", &self.inner.refresh)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

pub(crate) struct WeakSessionManager<B, C> {
    inner: Weak<Inner<B, C>>,
}

impl<B, C> WeakSessionManager<B, C> {
    pub(crate) fn upgrade(&self) -> Option<SessionManager<B, C>> {
        self.inner.upgrade().map(|inner| SessionManager { inner })
    }
}

impl<B: AuthBackend + 'static> SessionManager<B> {
    /// Starts building a session manager that talks to `backend`
    ///
    /// Unless overridden, sessions are kept in memory only, the system clock
    /// is used, and the default [`SessionConfig`] applies.
    pub fn builder(backend: B) -> SessionManagerBuilder<B> {
        SessionManagerBuilder {
            backend: Arc::new(backend),
            persistence: Box::new(InMemorySessionPersistence::new()),
            config: SessionConfig::default(),
            clock: System,
        }
    }
}

impl<B, C> SessionManager<B, C>
where
    B: AuthBackend + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Signs in with email and password
    ///
    /// While the request is outstanding the snapshot reports `is_loading`. On
    /// failure, the authority's message is recorded as the snapshot's `error`
    /// and no session is established.
    ///
    /// # Errors
    ///
    /// Returns the authority's refusal, or an error if it answered with an
    /// access token that cannot be read.
    pub async fn login(
        &self,
        credentials: &Credentials,
        remember_me: bool,
    ) -> Result<UserIdentity, AuthError> {
        self.inner.store.begin_request();
        let result = self.inner.backend.login(credentials).await;
        self.establish(result.map_err(auth_error), remember_me).await
    }

    /// Creates an account and signs in as the new user
    ///
    /// The session is remembered according to
    /// [`SessionConfig::remember_me_default`].
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register(&self, registration: &Registration) -> Result<UserIdentity, AuthError> {
        self.inner.store.begin_request();
        let result = self.inner.backend.register(registration).await;
        self.establish(
            result.map_err(auth_error),
            self.inner.config.remember_me_default(),
        )
        .await
    }

    async fn establish(
        &self,
        result: Result<TokenPair, AuthError>,
        remember_me: bool,
    ) -> Result<UserIdentity, AuthError> {
        let store = &self.inner.store;

        let tokens = match result {
            Ok(tokens) => tokens,
            Err(error) => {
                tracing::debug!(%error, "authority refused sign-in");
                store.fail_request(error.message());
                return Err(error);
            }
        };

        let user = match UserIdentity::from_access_token(tokens.access_token()) {
            Ok(user) => user,
            Err(source) => {
                let error = auth_error_from_token(source);
                tracing::warn!(%error, "unable to read identity from issued token");
                store.fail_request(error.message());
                return Err(error);
            }
        };

        store.login(user.clone(), tokens, remember_me).await;
        self.inner.refresh.forget_ended_sessions();
        tracing::info!(user = %user.id(), remember_me, "signed in");

        Ok(user)
    }

    /// Ends the session
    ///
    /// Local state and durable storage are cleared first, so the session is
    /// gone even if the authority is unreachable. The authority is then told
    /// on a best-effort basis. Calling this with no session does nothing.
    pub async fn logout(&self) {
        let ended = self.inner.store.logout().await;
        self.inner.refresh.forget_ended_sessions();

        match ended {
            Some(tokens) => {
                tracing::info!("signed out");
                logout_best_effort(&*self.inner.backend, &tokens).await;
            }
            None => tracing::debug!("no session to sign out of"),
        }
    }

    /// Asks the authority to send a password reset link
    ///
    /// # Errors
    ///
    /// Returns the authority's refusal.
    pub async fn forgot_password(&self, email: &EmailRef) -> Result<(), AuthError> {
        self.inner
            .backend
            .forgot_password(email)
            .await
            .map_err(auth_error)
    }

    /// Sets a new password with a reset token
    ///
    /// Does not sign in.
    ///
    /// # Errors
    ///
    /// Returns the authority's refusal, for example when the token has
    /// expired.
    pub async fn reset_password(
        &self,
        token: &ResetTokenRef,
        new_password: &PasswordRef,
    ) -> Result<(), AuthError> {
        self.inner
            .backend
            .reset_password(token, new_password)
            .await
            .map_err(auth_error)
    }

    /// Refreshes the session's tokens, reporting only whether it worked
    ///
    /// Never fails. If the authority rejects the refresh token, the session
    /// has already been ended by the time this returns `false`.
    pub async fn refresh_session(&self) -> bool {
        match self.inner.refresh.refresh_access_token().await {
            Ok(_) => true,
            Err(RefreshError::Rejected { .. }) => false,
            Err(RefreshError::Interrupted) => {
                tracing::warn!("token refresh was interrupted; ending session");
                self.logout().await;
                false
            }
            Err(error) => {
                tracing::debug!(%error, "session refresh did not complete");
                false
            }
        }
    }

    /// Refreshes the session's tokens only if the access token is about to
    /// expire
    ///
    /// Returns whether a session with a usable token remains.
    pub async fn refresh_if_due(&self) -> bool {
        let snapshot = self.inner.store.snapshot();
        let tokens = match snapshot.tokens() {
            Some(tokens) => tokens,
            None => return false,
        };

        let lookahead = self.inner.config.refresh_lookahead();
        if tokens.needs_refresh_at(self.inner.refresh.now(), lookahead) {
            self.refresh_session().await
        } else {
            true
        }
    }

    /// Returns an access token that is not about to expire, refreshing it if
    /// necessary
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::get_valid_access_token`].
    pub async fn get_valid_access_token(&self) -> Result<AccessToken, RefreshError> {
        self.inner.refresh.get_valid_access_token().await
    }

    /// Obtains a new access token, joining any refresh already in flight
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::refresh_access_token`].
    pub async fn refresh_access_token(&self) -> Result<AccessToken, RefreshError> {
        self.inner.refresh.refresh_access_token().await
    }

    /// Re-establishes a remembered session from durable storage
    ///
    /// A stored session that was not remembered, or whose tokens cannot be
    /// read, is discarded. Does nothing if a session is already active.
    /// Returns whether a session was restored.
    pub async fn restore(&self) -> bool {
        let store = &self.inner.store;
        if store.snapshot().is_authenticated() {
            tracing::debug!("session already active; not restoring");
            return false;
        }

        let record = match store.load_persisted().await {
            Some(record) => record,
            None => {
                tracing::debug!("no stored session");
                return false;
            }
        };

        if !record.remember_me || record.tokens.refresh_token.as_str().is_empty() {
            tracing::debug!("stored session is not restorable; discarding");
            store.clear_persisted().await;
            return false;
        }

        let tokens = TokenPair::from(record.tokens);
        match UserIdentity::from_access_token(tokens.access_token()) {
            Ok(user) => {
                tracing::info!(user = %user.id(), "session restored");
                store.login(user, tokens, true).await;
                self.inner.refresh.forget_ended_sessions();
                true
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "stored access token is unreadable; discarding"
                );
                store.clear_persisted().await;
                false
            }
        }
    }

    /// Starts a task that keeps the session's tokens fresh
    ///
    /// Every [`check_interval`](SessionConfig::check_interval) the task
    /// refreshes the access token if it is about to expire. The task stops
    /// when the returned handle is dropped or when every clone of this manager
    /// has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn_background_refresh(&self) -> BackgroundRefresh {
        background::spawn(
            WeakSessionManager {
                inner: Arc::downgrade(&self.inner),
            },
            self.inner.store.subscribe(),
            self.inner.config.check_interval(),
        )
    }
}

impl<B, C> SessionManager<B, C> {
    /// The current session state
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.inner.store.snapshot()
    }

    /// A receiver that observes every change to the session
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.inner.store.subscribe()
    }

    /// A read-only handle for authorization decisions
    pub fn guard(&self) -> AuthorizationGuard {
        AuthorizationGuard::new(self.inner.store.subscribe())
    }

    /// The underlying session store
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    /// The underlying refresh coordinator
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator<B, C> {
        &self.inner.refresh
    }

    /// The configuration in effect
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

/// Configures a [`SessionManager`]
pub struct SessionManagerBuilder<B, C = System> {
    backend: Arc<B>,
    persistence: Box<dyn SessionPersistence>,
    config: SessionConfig,
    clock: C,
}

impl<B, C: fmt::Debug> fmt::Debug for SessionManagerBuilder<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManagerBuilder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<B, C> SessionManagerBuilder<B, C>
where
    B: AuthBackend + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Writes the session through to `persistence`
    pub fn with_persistence(mut self, persistence: impl SessionPersistence + 'static) -> Self {
        self.persistence = Box::new(persistence);
        self
    }

    /// Applies `config`
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads the current time from `clock`
    pub fn with_clock<C2>(self, clock: C2) -> SessionManagerBuilder<B, C2>
    where
        C2: Clock + Clone + Send + Sync + 'static,
    {
        SessionManagerBuilder {
            backend: self.backend,
            persistence: self.persistence,
            config: self.config,
            clock,
        }
    }

    /// Builds the manager with no active session
    ///
    /// Call [`SessionManager::restore`] to pick up a remembered session.
    pub fn build(self) -> SessionManager<B, C> {
        let store = Arc::new(SessionStore::with_boxed_persistence(self.persistence));
        let refresh = RefreshCoordinator::new(
            store.clone(),
            self.backend.clone(),
            self.clock,
            self.config.refresh_lookahead(),
        );

        SessionManager {
            inner: Arc::new(Inner {
                store,
                backend: self.backend,
                refresh,
                config: self.config,
            }),
        }
    }
}
