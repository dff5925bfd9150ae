//! Read-only authorization queries over the session

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::{store::SessionSnapshot, RolePolicy, RoleRef, UserIdentity};

/// Why access was refused
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
pub enum AccessDenied {
    /// No user is signed in
    #[error("authentication required")]
    Unauthenticated,
    /// The user does not hold the required roles
    #[error("insufficient role")]
    InsufficientRole,
}

impl From<crate::InsufficientRole> for AccessDenied {
    fn from(_: crate::InsufficientRole) -> Self {
        Self::InsufficientRole
    }
}

/// Answers authorization questions against the current session
///
/// Every query reads the latest state, so a guard never needs refreshing.
/// Cloning is cheap.
#[derive(Clone, Debug)]
pub struct AuthorizationGuard {
    session: watch::Receiver<Arc<SessionSnapshot>>,
}

impl AuthorizationGuard {
    pub(crate) fn new(session: watch::Receiver<Arc<SessionSnapshot>>) -> Self {
        Self { session }
    }

    fn current(&self) -> Arc<SessionSnapshot> {
        self.session.borrow().clone()
    }

    /// Whether a user is signed in
    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_authenticated()
    }

    /// The signed-in user
    pub fn user(&self) -> Option<UserIdentity> {
        self.session.borrow().user().cloned()
    }

    /// Whether the signed-in user holds `role`
    ///
    /// Always `false` when no one is signed in.
    pub fn has_role(&self, role: impl AsRef<str>) -> bool {
        let session = self.current();
        session
            .user()
            .map_or(false, |u| u.roles().contains(RoleRef::from_str(role.as_ref())))
    }

    /// Whether the signed-in user holds at least one of `roles`
    pub fn has_any_role<I, T>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let session = self.current();
        match session.user() {
            Some(user) => roles
                .into_iter()
                .any(|r| user.roles().contains(RoleRef::from_str(r.as_ref()))),
            None => false,
        }
    }

    /// Whether the signed-in user holds every one of `roles`
    pub fn has_all_roles<I, T>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let session = self.current();
        match session.user() {
            Some(user) => roles
                .into_iter()
                .all(|r| user.roles().contains(RoleRef::from_str(r.as_ref()))),
            None => false,
        }
    }

    /// Checks the signed-in user against `policy`
    ///
    /// # Errors
    ///
    /// Returns why access was refused.
    pub fn authorize(&self, policy: &RolePolicy) -> Result<(), AccessDenied> {
        let session = self.current();
        let user = session.user().ok_or(AccessDenied::Unauthenticated)?;
        policy.evaluate(user.roles())?;
        Ok(())
    }

    /// Waits until the session changes
    ///
    /// Returns `false` once the session can no longer change.
    pub async fn changed(&mut self) -> bool {
        self.session.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use custos_clock::UnixTime;

    use super::*;
    use crate::{persistence::NoPersistence, store::SessionStore, test_util::pair_for, Roles};

    async fn signed_in(roles: &[&str]) -> (SessionStore, AuthorizationGuard) {
        let store = SessionStore::new(NoPersistence);
        let guard = AuthorizationGuard::new(store.subscribe());
        let tokens = pair_for("1", roles, UnixTime(1_000), "r");
        let user = UserIdentity::from_access_token(tokens.access_token()).unwrap();
        store.login(user, tokens, false).await;
        (store, guard)
    }

    #[tokio::test]
    async fn anonymous_has_nothing() {
        let store = SessionStore::new(NoPersistence);
        let guard = AuthorizationGuard::new(store.subscribe());

        assert!(!guard.is_authenticated());
        assert!(!guard.has_role("user"));
        assert!(!guard.has_any_role(["user", "admin"]));
        assert!(!guard.has_all_roles(Vec::<String>::new()));
        assert_eq!(
            guard.authorize(&RolePolicy::allow_any()),
            Err(AccessDenied::Unauthenticated)
        );
        assert_eq!(guard.user(), None);
    }

    #[tokio::test]
    async fn role_queries() {
        let (_store, guard) = signed_in(&["user"]).await;

        assert!(guard.is_authenticated());
        assert!(guard.has_role("user"));
        assert!(!guard.has_role("admin"));
        assert!(!guard.has_any_role(["admin", "moderator"]));
        assert!(guard.has_any_role(["admin", "user"]));
        assert!(!guard.has_any_role(Vec::<&str>::new()));
        assert!(guard.has_all_roles(["user"]));
        assert!(!guard.has_all_roles(["user", "admin"]));
    }

    #[tokio::test]
    async fn policies() {
        let (_store, guard) = signed_in(&["user", "editor"]).await;

        assert_eq!(guard.authorize(&RolePolicy::allow_any()), Ok(()));
        assert_eq!(
            guard.authorize(&RolePolicy::any_of(["admin", "editor"])),
            Ok(())
        );
        assert_eq!(
            guard.authorize(&RolePolicy::allow_one(Roles::from_iter(["admin"]))),
            Err(AccessDenied::InsufficientRole)
        );
        assert_eq!(
            guard.authorize(&RolePolicy::deny_all()),
            Err(AccessDenied::InsufficientRole)
        );
    }

    #[tokio::test]
    async fn follows_the_session() {
        let (store, mut guard) = signed_in(&["admin"]).await;
        let observer = guard.clone();
        assert!(observer.has_role("admin"));

        store.logout().await;
        assert!(guard.changed().await);

        assert!(!observer.is_authenticated());
        assert!(!observer.has_role("admin"));
    }
}
