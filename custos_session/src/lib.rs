//! Client-side management of an authenticated session
//!
//! This library holds the access and refresh tokens of a single signed-in
//! user, decides when the access token needs renewing, and renews it without
//! ever sending more than one refresh request at a time, no matter how many
//! tasks ask for a token at once. A refresh token the authority rejects ends
//! the session cleanly, and the rest of the application observes that through
//! the same state it reads everything else from.
//!
//! # General Flow
//!
//! Construct a [`SessionManager`] around an [`AuthBackend`], optionally with
//! somewhere durable to keep the session, and restore any session the user
//! asked to be remembered. Anything that needs to call a protected API asks the
//! manager for a token with [`get_valid_access_token`][SessionManager::get_valid_access_token],
//! which only touches the network when the token is about to expire.
//!
//! ```no_run
//! # #[cfg(all(feature = "http", feature = "file"))]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use custos_session::{
//!     backend::{Credentials, HttpAuthBackend},
//!     persistence::FileSessionPersistence,
//!     RolePolicy, SessionConfig, SessionManager,
//! };
//!
//! let backend = HttpAuthBackend::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://example.com/api/")?,
//! );
//!
//! let manager = SessionManager::builder(backend)
//!     .with_persistence(FileSessionPersistence::new("session.json"))
//!     .with_config(SessionConfig::default())
//!     .build();
//!
//! if !manager.restore().await {
//!     manager
//!         .login(&Credentials::new("ada@example.com", "correct horse"), true)
//!         .await?;
//! }
//!
//! let _refresher = manager.spawn_background_refresh();
//!
//! let token = manager.get_valid_access_token().await?;
//! tracing::info!(token = format_args!("{:#?}", token), "calling the API");
//!
//! let guard = manager.guard();
//! if guard.authorize(&RolePolicy::any_of(["admin", "moderator"])).is_ok() {
//!     tracing::info!("showing moderation tools");
//! }
//!
//! manager.logout().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `http`: Provides [`HttpAuthBackend`][backend::HttpAuthBackend], which speaks to a JSON
//!   authentication API using [reqwest].
//! * `file`: Provides [`FileSessionPersistence`][persistence::FileSessionPersistence], which
//!   keeps the session in a file on the local filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod background;
pub mod backend;
mod braids;
mod config;
mod error;
mod guard;
mod manager;
pub mod persistence;
mod refresh;
mod roles;
mod store;
#[cfg(test)]
mod test_util;
pub mod token_clock;
mod tokens;

pub use background::BackgroundRefresh;
pub use backend::AuthBackend;
pub use braids::*;
pub use config::SessionConfig;
pub use error::{
    AuthError, MalformedTokenError, PersistenceError, RefreshError, TransitionError,
};
pub use guard::{AccessDenied, AuthorizationGuard};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use refresh::RefreshCoordinator;
pub use roles::{InsufficientRole, Iter as RolesIter, RolePolicy, Roles};
pub use store::{ListenerHandle, SessionSnapshot, SessionStore};
pub use token_clock::{AccessClaims, TokenStatus};
pub use tokens::{TokenPair, TokenRecord, UserIdentity};
