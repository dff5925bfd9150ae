//! Periodic proactive refresh

use std::{sync::Arc, time::Duration};

use custos_clock::Clock;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{backend::AuthBackend, manager::WeakSessionManager, store::SessionSnapshot};

/// A handle to the background refresh task
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct BackgroundRefresh {
    handle: JoinHandle<()>,
}

impl BackgroundRefresh {
    /// Stops the task
    pub fn stop(self) {
        self.handle.abort();
    }

    /// Whether the task has stopped on its own
    ///
    /// This happens once every clone of the manager has been dropped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for BackgroundRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) fn spawn<B, C>(
    manager: WeakSessionManager<B, C>,
    changes: watch::Receiver<Arc<SessionSnapshot>>,
    period: Duration,
) -> BackgroundRefresh
where
    B: AuthBackend + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    let handle = tokio::spawn(forever_check(manager, changes, period));
    BackgroundRefresh { handle }
}

async fn forever_check<B, C>(
    weak: WeakSessionManager<B, C>,
    mut changes: watch::Receiver<Arc<SessionSnapshot>>,
    period: Duration,
) where
    B: AuthBackend + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut epoch = changes.borrow_and_update().epoch();

    tracing::debug!(period_secs = period.as_secs(), "background refresh started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let manager = match weak.upgrade() {
                    Some(manager) => manager,
                    None => break,
                };

                if manager.snapshot().is_authenticated() {
                    tracing::trace!("checking whether the access token is due for refresh");
                    manager.refresh_if_due().await;
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }

                let current = changes.borrow_and_update().epoch();
                if current != epoch {
                    epoch = current;
                    ticker.reset();
                    tracing::trace!(epoch, "session changed; restarting check interval");
                }
            }
        }
    }

    tracing::info!("session manager dropped; background refresh stopped");
}
