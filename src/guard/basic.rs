use crate::context::RequestContext;
use crate::guard::{Authentication, Authenticator, Principal};
use axum::http::{
    StatusCode,
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::HashMap;

struct Identity {
    password: String,
    principal: Principal,
}

/// HTTP Basic authentication against an in-memory identity store.
///
/// Missing or wrong credentials answer `401` with a `Basic` challenge.
pub struct BasicAuthenticator {
    realm: String,
    identities: HashMap<String, Identity>,
}

impl BasicAuthenticator {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            identities: HashMap::new(),
        }
    }

    pub fn with_user<I, S>(mut self, name: &str, password: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identities.insert(
            name.to_string(),
            Identity {
                password: password.to_string(),
                principal: Principal::new(name, roles),
            },
        );
        self
    }

    fn credentials(ctx: &RequestContext) -> Option<(String, String)> {
        let header = ctx.request_headers().get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    fn challenge(&self, ctx: &mut RequestContext) {
        let challenge = format!("Basic realm=\"{}\"", self.realm);
        if let Err(e) = ctx.set_response_header(WWW_AUTHENTICATE.as_str(), &challenge) {
            tracing::warn!(error = %e, "Invalid authentication challenge");
        }
        ctx.set_status(StatusCode::UNAUTHORIZED);
        ctx.end_exchange();
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, ctx: &mut RequestContext) -> Authentication {
        let accepted = Self::credentials(ctx).and_then(|(user, password)| {
            self.identities
                .get(&user)
                .filter(|identity| identity.password == password)
                .map(|identity| identity.principal.clone())
        });
        match accepted {
            Some(principal) => Authentication::Authenticated(Some(principal)),
            None => {
                tracing::debug!(path = %ctx.path(), realm = %self.realm, "Authentication required");
                self.challenge(ctx);
                Authentication::NotAuthenticated
            }
        }
    }
}
