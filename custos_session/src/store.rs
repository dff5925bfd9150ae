//! The single authoritative record of session state
//!
//! State only changes through the named transitions on [`SessionStore`]. Each
//! transition swaps in a complete new [`SessionSnapshot`], so an observer never
//! sees a half-applied change, and then notifies every observer.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::watch;

use crate::{
    error::TransitionError,
    persistence::{PersistedSession, SessionPersistence},
    TokenPair, UserIdentity,
};

/// An immutable view of the session at one point in time
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    active: Option<ActiveSession>,
    is_refreshing: bool,
    is_loading: bool,
    error: Option<String>,
    epoch: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ActiveSession {
    user: UserIdentity,
    tokens: TokenPair,
    remember_me: bool,
}

impl SessionSnapshot {
    /// The signed-in user, if any
    #[inline]
    pub fn user(&self) -> Option<&UserIdentity> {
        self.active.as_ref().map(|a| &a.user)
    }

    /// The current token pair, if any
    #[inline]
    pub fn tokens(&self) -> Option<&TokenPair> {
        self.active.as_ref().map(|a| &a.tokens)
    }

    /// Whether a token pair is held
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.active.is_some()
    }

    /// Whether a token refresh is in flight
    ///
    /// Meant for user feedback only; it never affects authorization.
    #[inline]
    pub fn is_refreshing(&self) -> bool {
        self.is_refreshing
    }

    /// Whether a login or registration request is in flight
    #[inline]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// The message from the most recent failed login or registration
    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the current session should survive restarts
    #[inline]
    pub fn remember_me(&self) -> bool {
        self.active.as_ref().map_or(false, |a| a.remember_me)
    }

    /// Identifies the current session
    ///
    /// Increases every time a session begins or ends, so a value captured
    /// before an await can be compared afterwards to detect that the session
    /// changed underneath.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn persisted(&self) -> Option<PersistedSession> {
        self.active.as_ref().map(|a| PersistedSession {
            tokens: a.tokens.to_record(),
            remember_me: a.remember_me,
        })
    }
}

/// Identifies a registered listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Holds the session and applies transitions to it
pub struct SessionStore {
    state: watch::Sender<Arc<SessionSnapshot>>,
    listeners: Mutex<Listeners>,
    persistence: Box<dyn SessionPersistence>,
    write_order: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.borrow())
            .field("listeners", &lock(&self.listeners).entries.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionStore {
    /// Constructs an empty store that writes through to `persistence`
    pub fn new(persistence: impl SessionPersistence + 'static) -> Self {
        Self::with_boxed_persistence(Box::new(persistence))
    }

    pub(crate) fn with_boxed_persistence(persistence: Box<dyn SessionPersistence>) -> Self {
        let (state, _) = watch::channel(Arc::new(SessionSnapshot::default()));
        Self {
            state,
            listeners: Mutex::new(Listeners::default()),
            persistence,
            write_order: tokio::sync::Mutex::new(()),
        }
    }

    /// The current state
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.state.borrow().clone()
    }

    /// A receiver that observes every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.state.subscribe()
    }

    /// Registers a callback to run after every transition
    ///
    /// The callback runs synchronously on the task that made the change and
    /// receives the new snapshot. It must not call back into the store.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    /// Unregisters a callback, returning whether it was registered
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.entries.len();
        listeners.entries.retain(|(id, _)| *id != handle.0);
        listeners.entries.len() != before
    }

    /// Begins a new session
    ///
    /// Replaces any previous session outright, clears the loading and error
    /// state, and persists the token pair.
    pub async fn login(&self, user: UserIdentity, tokens: TokenPair, remember_me: bool) {
        let _ordered = self.write_order.lock().await;

        let snapshot = self.apply(|s| {
            s.active = Some(ActiveSession {
                user,
                tokens,
                remember_me,
            });
            s.is_refreshing = false;
            s.is_loading = false;
            s.error = None;
            s.epoch += 1;
            Ok(())
        });

        if let Ok(snapshot) = snapshot {
            tracing::debug!(epoch = snapshot.epoch, "session started");
            self.write_through(&snapshot).await;
        }
    }

    /// Replaces the token pair of the current session
    ///
    /// # Errors
    ///
    /// Fails without changing anything if no session is active.
    pub async fn set_tokens(&self, tokens: TokenPair) -> Result<(), TransitionError> {
        self.replace_tokens(None, tokens).await
    }

    /// Replaces the token pair only if the session identified by `epoch` is
    /// still the current one
    ///
    /// # Errors
    ///
    /// Fails without changing anything if the session has ended or been
    /// replaced since `epoch` was observed.
    pub async fn set_tokens_for_epoch(
        &self,
        epoch: u64,
        tokens: TokenPair,
    ) -> Result<(), TransitionError> {
        self.replace_tokens(Some(epoch), tokens).await
    }

    async fn replace_tokens(
        &self,
        expected_epoch: Option<u64>,
        tokens: TokenPair,
    ) -> Result<(), TransitionError> {
        let _ordered = self.write_order.lock().await;

        let snapshot = self.apply(|s| {
            if expected_epoch.map_or(false, |e| e != s.epoch) {
                return Err(TransitionError::StaleSession);
            }
            let active = s.active.as_mut().ok_or(TransitionError::NotAuthenticated)?;
            active.tokens = tokens;
            Ok(())
        })?;

        tracing::debug!(epoch = snapshot.epoch, "session tokens replaced");
        self.write_through(&snapshot).await;
        Ok(())
    }

    /// Ends the session, returning the tokens it held
    ///
    /// Always succeeds, and ending an already-ended session changes nothing
    /// but still clears durable storage.
    pub async fn logout(&self) -> Option<TokenPair> {
        self.end_session(None).await
    }

    /// Ends the session only if it is the one identified by `epoch`
    pub async fn end_session_for_epoch(&self, epoch: u64) -> Option<TokenPair> {
        self.end_session(Some(epoch)).await
    }

    async fn end_session(&self, expected_epoch: Option<u64>) -> Option<TokenPair> {
        let _ordered = self.write_order.lock().await;

        let mut ended = None;
        let snapshot = self.apply(|s| {
            if expected_epoch.map_or(false, |e| e != s.epoch) {
                return Err(TransitionError::StaleSession);
            }
            ended = s.active.take().map(|a| a.tokens);
            if ended.is_some() {
                s.epoch += 1;
            }
            s.is_refreshing = false;
            s.is_loading = false;
            s.error = None;
            Ok(())
        });

        match snapshot {
            Ok(snapshot) => {
                if ended.is_some() {
                    tracing::debug!(epoch = snapshot.epoch, "session ended");
                }
                self.write_through(&snapshot).await;
                ended
            }
            Err(_) => None,
        }
    }

    /// Marks whether a token refresh is in flight
    pub fn set_refreshing(&self, refreshing: bool) {
        if let Some(snapshot) = self.publish_refreshing(refreshing) {
            self.notify(&snapshot);
        }
    }

    /// Publishes the refreshing flag to subscribers without running listeners
    ///
    /// Returns the new snapshot if the flag changed. The caller owes listeners
    /// a [`notify`](Self::notify) with it once it holds no locks of its own.
    pub(crate) fn publish_refreshing(&self, refreshing: bool) -> Option<Arc<SessionSnapshot>> {
        let mut published = None;
        self.state.send_if_modified(|current| {
            if current.is_refreshing == refreshing {
                return false;
            }
            let mut next = (**current).clone();
            next.is_refreshing = refreshing;
            let next = Arc::new(next);
            *current = next.clone();
            published = Some(next);
            true
        });
        published
    }

    /// Marks a login or registration request as started
    pub fn begin_request(&self) {
        let _ = self.apply(|s| {
            s.is_loading = true;
            s.error = None;
            Ok(())
        });
    }

    /// Marks the in-progress request as failed with a user-facing message
    pub fn fail_request(&self, message: impl Into<String>) {
        let message = message.into();
        let _ = self.apply(|s| {
            s.is_loading = false;
            s.error = Some(message);
            Ok(())
        });
    }

    /// Clears any error left by a failed request
    pub fn clear_error(&self) {
        let _ = self.apply(|s| {
            s.error = None;
            Ok(())
        });
    }

    /// Applies a change to a copy of the state and publishes it whole
    fn apply<F>(&self, change: F) -> Result<Arc<SessionSnapshot>, TransitionError>
    where
        F: FnOnce(&mut SessionSnapshot) -> Result<(), TransitionError>,
    {
        let mut outcome = Err(TransitionError::NotAuthenticated);

        self.state.send_if_modified(|current| {
            let mut next = (**current).clone();
            match change(&mut next) {
                Ok(()) => {
                    let next = Arc::new(next);
                    *current = next.clone();
                    outcome = Ok(next);
                    true
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });

        let snapshot = outcome?;
        self.notify(&snapshot);
        Ok(snapshot)
    }

    pub(crate) fn notify(&self, snapshot: &SessionSnapshot) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            listener(snapshot);
        }
    }

    async fn write_through(&self, snapshot: &SessionSnapshot) {
        let result = match snapshot.persisted() {
            Some(record) => self.persistence.persist(&record).await,
            None => self.persistence.clear().await,
        };

        if let Err(error) = result {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to write session to durable storage"
            );
        }
    }

    pub(crate) async fn load_persisted(&self) -> Option<PersistedSession> {
        match self.persistence.load().await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to read session from durable storage"
                );
                None
            }
        }
    }

    pub(crate) async fn clear_persisted(&self) {
        let _ordered = self.write_order.lock().await;
        if let Err(error) = self.persistence.clear().await {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to clear durable session storage"
            );
        }
    }
}
