//! Single-flight token refresh
//!
//! However many callers ask for a fresh access token at once, at most one
//! refresh request is outstanding for a session. Every caller that arrives
//! while it is outstanding waits on the same outcome.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use custos_clock::{Clock, DurationSecs};
use tokio::sync::watch;

use crate::{
    backend::{logout_best_effort, AuthBackend},
    error::{refresh_rejected, RefreshError},
    store::SessionStore,
    AccessToken, RefreshToken,
};

type Outcome = Result<AccessToken, RefreshError>;

#[derive(Debug)]
struct InFlight {
    id: u64,
    epoch: u64,
    outcome: watch::Receiver<Option<Outcome>>,
}

enum Flight {
    Ready(AccessToken),
    Pending(watch::Receiver<Option<Outcome>>),
}

/// Coordinates refreshes of the session's access token
pub struct RefreshCoordinator<B, C> {
    store: Arc<SessionStore>,
    backend: Arc<B>,
    clock: C,
    lookahead: DurationSecs,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl<B, C: Clone> Clone for RefreshCoordinator<B, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            backend: self.backend.clone(),
            clock: self.clock.clone(),
            lookahead: self.lookahead,
            in_flight: self.in_flight.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<B, C: fmt::Debug> fmt::Debug for RefreshCoordinator<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("clock", &self.clock)
            .field("lookahead", &self.lookahead)
            .field("in_flight", &lock(&self.in_flight).as_ref().map(|f| f.id))
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B, C> RefreshCoordinator<B, C>
where
    B: AuthBackend + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        store: Arc<SessionStore>,
        backend: Arc<B>,
        clock: C,
        lookahead: DurationSecs,
    ) -> Self {
        Self {
            store,
            backend,
            clock,
            lookahead,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Obtains a new access token, joining any refresh already in flight
    ///
    /// # Errors
    ///
    /// Fails if there is no session, if the authority rejects the refresh
    /// token (which also ends the session), or if the session ends before the
    /// refresh settles.
    pub async fn refresh_access_token(&self) -> Result<AccessToken, RefreshError> {
        settle(self.join_or_start(false)?).await
    }

    /// Returns an access token that is not about to expire
    ///
    /// If the current token is outside the refresh lookahead window, it is
    /// returned without any network traffic. Otherwise this behaves like
    /// [`refresh_access_token`](Self::refresh_access_token).
    pub async fn get_valid_access_token(&self) -> Result<AccessToken, RefreshError> {
        let snapshot = self.store.snapshot();
        let tokens = snapshot.tokens().ok_or(RefreshError::NotAuthenticated)?;

        let now = self.clock.now();
        if !tokens.needs_refresh_at(now, self.lookahead) {
            return Ok(tokens.access_token().to_owned());
        }

        tracing::debug!(
            expires_at = ?tokens.expires_at(),
            now = now.0,
            "access token due for refresh"
        );
        settle(self.join_or_start(true)?).await
    }

    /// Forgets any refresh in flight
    ///
    /// Callers already waiting still receive its outcome, but the outcome will
    /// not be applied to a session begun after this call, and new callers start
    /// a fresh refresh.
    pub fn clear_refresh_state(&self) {
        let cleared = {
            let mut slot = lock(&self.in_flight);
            slot.take().map(|flight| {
                tracing::trace!(flight = flight.id, "abandoned in-flight refresh");
                self.store.publish_refreshing(false)
            })
        };

        if let Some(Some(snapshot)) = cleared {
            self.store.notify(&snapshot);
        }
    }

    /// Forgets a refresh in flight for a session that has since ended
    ///
    /// A refresh already started for the current session is left alone.
    pub(crate) fn forget_ended_sessions(&self) {
        let epoch = self.store.snapshot().epoch();
        let cleared = {
            let mut slot = lock(&self.in_flight);
            if slot.as_ref().map_or(false, |f| f.epoch != epoch) {
                if let Some(flight) = slot.take() {
                    tracing::trace!(flight = flight.id, "abandoned refresh of an ended session");
                }
                self.store.publish_refreshing(false)
            } else {
                None
            }
        };

        if let Some(snapshot) = cleared {
            self.store.notify(&snapshot);
        }
    }

    pub(crate) fn now(&self) -> custos_clock::UnixTime {
        self.clock.now()
    }

    /// Whether a refresh is currently in flight for the current session
    pub fn is_refreshing(&self) -> bool {
        let epoch = self.store.snapshot().epoch();
        lock(&self.in_flight)
            .as_ref()
            .map_or(false, |f| f.epoch == epoch)
    }

    /// Joins the flight for the current session, or starts one
    ///
    /// With `due_only`, a token that another flight has renewed in the
    /// meantime is handed back without starting anything.
    fn join_or_start(&self, due_only: bool) -> Result<Flight, RefreshError> {
        let mut slot = lock(&self.in_flight);
        let snapshot = self.store.snapshot();

        if let Some(flight) = slot.as_ref() {
            if flight.epoch == snapshot.epoch() {
                tracing::trace!(flight = flight.id, "joining in-flight refresh");
                return Ok(Flight::Pending(flight.outcome.clone()));
            }
            tracing::trace!(flight = flight.id, "in-flight refresh belongs to an ended session");
        }

        let tokens = snapshot.tokens().ok_or(RefreshError::NotAuthenticated)?;
        if due_only && !tokens.needs_refresh_at(self.clock.now(), self.lookahead) {
            return Ok(Flight::Ready(tokens.access_token().to_owned()));
        }

        let epoch = snapshot.epoch();
        let refresh_token = tokens.refresh_token().to_owned();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        *slot = Some(InFlight {
            id,
            epoch,
            outcome: rx.clone(),
        });
        let published = self.store.publish_refreshing(true);
        drop(slot);

        if let Some(snapshot) = published {
            self.store.notify(&snapshot);
        }

        tracing::debug!(flight = id, epoch, "starting token refresh");
        let this = self.clone();
        tokio::spawn(async move { this.run(id, epoch, refresh_token, tx).await });

        Ok(Flight::Pending(rx))
    }

    async fn run(
        self,
        id: u64,
        epoch: u64,
        refresh_token: RefreshToken,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        let landing = Landing {
            store: self.store.clone(),
            in_flight: self.in_flight.clone(),
            id,
        };

        let mut ended = None;
        let outcome = match self.backend.refresh(&refresh_token).await {
            Ok(tokens) => {
                let access_token = tokens.access_token().to_owned();
                match self.store.set_tokens_for_epoch(epoch, tokens).await {
                    Ok(()) => {
                        tracing::info!(flight = id, "access token refreshed");
                        Ok(access_token)
                    }
                    Err(_) => {
                        tracing::info!(
                            flight = id,
                            "session changed during refresh; discarding new tokens"
                        );
                        Err(RefreshError::Superseded)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(
                    flight = id,
                    error = (&error as &dyn std::error::Error),
                    "refresh rejected; ending session"
                );
                ended = self.store.end_session_for_epoch(epoch).await;
                Err(refresh_rejected(error))
            }
        };

        drop(landing);
        let _ = tx.send(Some(outcome));

        if let Some(tokens) = ended {
            logout_best_effort(&*self.backend, &tokens).await;
        }
    }
}

async fn settle(flight: Flight) -> Outcome {
    let mut outcome = match flight {
        Flight::Ready(token) => return Ok(token),
        Flight::Pending(outcome) => outcome,
    };

    let settled = match outcome.wait_for(Option::is_some).await {
        Ok(settled) => (*settled).clone(),
        Err(_) => None,
    };

    settled.unwrap_or(Err(RefreshError::Interrupted))
}

/// Releases the in-flight slot when a refresh task finishes, even if it
/// panicked or was cancelled
struct Landing {
    store: Arc<SessionStore>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    id: u64,
}

impl Drop for Landing {
    fn drop(&mut self) {
        let published = {
            let mut slot = lock(&self.in_flight);
            if slot.as_ref().map_or(false, |f| f.id == self.id) {
                *slot = None;
                self.store.publish_refreshing(false)
            } else {
                None
            }
        };

        if let Some(snapshot) = published {
            self.store.notify(&snapshot);
        }
    }
}
