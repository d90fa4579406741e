//! Authentication and role checks for routes declaring `roles_allowed`.

mod basic;

pub use basic::BasicAuthenticator;

use crate::context::RequestContext;
use std::collections::BTreeSet;

/// Wildcard role admitting any authenticated principal.
pub const ANY_ROLE: &str = "**";

/// Ok(()) means allowed, Err(GuardError) means denied.
pub type GuardResult = Result<(), GuardError>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// An authenticated identity and its roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Credentials were accepted. The principal may still be unknown.
    Authenticated(Option<Principal>),
    /// Credentials were missing or rejected. The authenticator has already
    /// written its challenge to the exchange.
    NotAuthenticated,
}

/// Forces authentication on an exchange.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, ctx: &mut RequestContext) -> Authentication;
}

/// Normalized `roles_allowed` of one route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolesAllowed {
    roles: BTreeSet<String>,
    any: bool,
}

impl RolesAllowed {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        let any = roles.contains(ANY_ROLE);
        Self { roles, any }
    }

    /// No roles configured; the route is open.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Decide for an authenticated exchange. A missing principal is denied.
    pub fn check(&self, principal: Option<&Principal>) -> GuardResult {
        let Some(principal) = principal else {
            return Err(GuardError::Forbidden(
                "authenticated without a principal".to_string(),
            ));
        };
        if self.any || principal.roles.iter().any(|r| self.roles.contains(r)) {
            Ok(())
        } else {
            Err(GuardError::Forbidden(format!(
                "'{}' holds none of the required roles",
                principal.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_match() {
        let roles = RolesAllowed::new(["admin"]);
        let admin = Principal::new("stuart", ["admin"]);
        let user = Principal::new("bob", ["user"]);
        assert_eq!(roles.check(Some(&admin)), Ok(()));
        assert!(matches!(roles.check(Some(&user)), Err(GuardError::Forbidden(_))));
    }

    #[test]
    fn test_wildcard_admits_anyone_authenticated() {
        let roles = RolesAllowed::new(vec!["**".to_string()]);
        let nobody = Principal::new("anon", Vec::<String>::new());
        assert_eq!(roles.check(Some(&nobody)), Ok(()));
    }

    #[test]
    fn test_missing_principal_is_forbidden() {
        let roles = RolesAllowed::new(["**"]);
        assert!(matches!(roles.check(None), Err(GuardError::Forbidden(_))));
        assert!(RolesAllowed::default().is_empty());
    }
}
