//! Role sets and role-based access policies

use std::{
    borrow::Borrow,
    collections::{btree_set, BTreeSet},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Role, RoleRef};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum RolesDto {
    String(String),
    Array(Vec<Role>),
}

impl From<Option<RolesDto>> for Roles {
    fn from(dto: Option<RolesDto>) -> Self {
        let roles = match dto {
            Some(RolesDto::String(s)) => s
                .split_whitespace()
                .map(|r| Role::new(r.to_owned()))
                .collect(),
            Some(RolesDto::Array(arr)) => arr.into_iter().collect(),
            None => BTreeSet::new(),
        };

        Self(roles)
    }
}

impl From<Roles> for RolesDto {
    fn from(r: Roles) -> Self {
        RolesDto::Array(r.0.into_iter().collect())
    }
}

/// The set of roles granted to a user
///
/// Accepts either a JSON array of role names or a single whitespace-separated
/// string when deserialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Option<RolesDto>", into = "RolesDto")]
pub struct Roles(BTreeSet<Role>);

impl Roles {
    /// Produces an empty role set
    #[inline]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a role to the set
    #[inline]
    pub fn insert(&mut self, role: Role) {
        self.0.insert(role);
    }

    /// Whether the set has no roles
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of roles in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Produces an iterator of the roles in this set
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        self.into_iter()
    }

    /// Whether the set holds `role`
    #[inline]
    pub fn contains(&self, role: &RoleRef) -> bool {
        self.0.contains(role)
    }

    /// Whether the set holds at least one of `roles`
    ///
    /// An empty `roles` never matches.
    pub fn contains_any<I, T>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: Borrow<RoleRef>,
    {
        roles.into_iter().any(|r| self.0.contains(r.borrow()))
    }

    /// Whether the set holds every one of `roles`
    ///
    /// An empty `roles` always matches.
    pub fn contains_all<I, T>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: Borrow<RoleRef>,
    {
        roles.into_iter().all(|r| self.0.contains(r.borrow()))
    }
}

impl<T: AsRef<str>> FromIterator<T> for Roles {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|r| Role::new(r.as_ref().to_owned()))
                .collect(),
        )
    }
}

impl Extend<Role> for Roles {
    #[inline]
    fn extend<I: IntoIterator<Item = Role>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for Roles {
    type Item = Role;
    type IntoIter = btree_set::IntoIter<Role>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An iterator over a set of borrowed roles
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Role>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a RoleRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|x| &**x)
    }
}

impl<'a> IntoIterator for &'a Roles {
    type Item = &'a RoleRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Iter {
            iter: self.0.iter(),
        }
    }
}

/// The held roles did not satisfy any alternative of a [`RolePolicy`]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("insufficient role")]
pub struct InsufficientRole;

/// An access policy based on roles
///
/// The policy is a list of alternatives, each a set of roles that must all be
/// held. Access is allowed if any alternative is satisfied. A policy without
/// alternatives denies everything.
///
/// ```
/// use custos_session::{Roles, RolePolicy};
///
/// let policy = RolePolicy::deny_all()
///     .or_allow(Roles::from_iter(["admin"]))
///     .or_allow(Roles::from_iter(["moderator", "editor"]));
///
/// assert!(policy.evaluate(&Roles::from_iter(["admin"])).is_ok());
/// assert!(policy.evaluate(&Roles::from_iter(["moderator"])).is_err());
/// assert!(policy.evaluate(&Roles::from_iter(["editor", "moderator"])).is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct RolePolicy {
    alternatives: Vec<Roles>,
}

impl RolePolicy {
    /// Constructs a policy with no permissible alternatives
    #[inline]
    pub const fn deny_all() -> Self {
        Self {
            alternatives: Vec::new(),
        }
    }

    /// Constructs a policy satisfied by any authenticated user
    #[inline]
    pub fn allow_any() -> Self {
        Self::deny_all().or_allow(Roles::new())
    }

    /// Constructs a policy that requires all of `roles`
    #[inline]
    pub fn allow_one(roles: Roles) -> Self {
        Self::deny_all().or_allow(roles)
    }

    /// Constructs a policy satisfied by holding any single one of `roles`
    pub fn any_of<I, T>(roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        roles
            .into_iter()
            .fold(Self::deny_all(), |p, r| p.or_allow(Roles::from_iter([r])))
    }

    /// Adds an alternative set of roles that grants access
    #[inline]
    pub fn or_allow(mut self, roles: Roles) -> Self {
        self.allow(roles);
        self
    }

    /// Adds an alternative set of roles that grants access
    pub fn allow(&mut self, roles: Roles) {
        if roles.is_empty() {
            self.alternatives.clear();
        } else if self.alternatives.first().map_or(false, Roles::is_empty) {
            return;
        }
        self.alternatives.push(roles);
    }

    /// Checks the held roles against this policy
    pub fn evaluate(&self, held: &Roles) -> Result<(), InsufficientRole> {
        if self.alternatives.iter().any(|req| held.contains_all(req)) {
            Ok(())
        } else {
            Err(InsufficientRole)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_array_or_string() {
        let from_array: Roles = serde_json::from_str(r#"["user", "admin"]"#).unwrap();
        let from_string: Roles = serde_json::from_str(r#""admin  user""#).unwrap();
        let from_null: Roles = serde_json::from_str("null").unwrap();

        assert_eq!(from_array, from_string);
        assert_eq!(from_array.len(), 2);
        assert!(from_null.is_empty());
    }

    #[test]
    fn serializes_as_array() {
        let roles = Roles::from_iter(["user", "admin"]);
        let json = serde_json::to_string(&roles).unwrap();
        assert_eq!(json, r#"["admin","user"]"#);
    }

    #[test]
    fn any_and_all() {
        let roles = Roles::from_iter(["user"]);

        assert!(roles.contains(RoleRef::from_str("user")));
        assert!(!roles.contains_any(["admin", "moderator"].map(RoleRef::from_str)));
        assert!(roles.contains_any(["admin", "user"].map(RoleRef::from_str)));
        assert!(!roles.contains_all(["admin", "user"].map(RoleRef::from_str)));
        assert!(roles.contains_all(Vec::<Role>::new()));
        assert!(!roles.contains_any(Vec::<Role>::new()));
    }

    #[test]
    fn deny_all_denies_everyone() {
        let policy = RolePolicy::deny_all();
        assert_eq!(policy.evaluate(&Roles::new()), Err(InsufficientRole));
        assert_eq!(
            policy.evaluate(&Roles::from_iter(["admin"])),
            Err(InsufficientRole)
        );
    }

    #[test]
    fn allow_any_absorbs_further_alternatives() {
        let policy = RolePolicy::allow_any().or_allow(Roles::from_iter(["admin"]));
        assert!(policy.evaluate(&Roles::new()).is_ok());
    }

    #[test]
    fn any_of_needs_a_single_match() {
        let policy = RolePolicy::any_of(["admin", "moderator"]);
        assert!(policy.evaluate(&Roles::from_iter(["moderator"])).is_ok());
        assert!(policy.evaluate(&Roles::from_iter(["user"])).is_err());
    }
}
