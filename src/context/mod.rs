//! The per-request façade over the transport exchange.

mod session;

pub use session::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore};

use crate::error::{Result, SwitchyardError};
use crate::guard::Principal;
use crate::inject::Entity;
use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{COOKIE, LOCATION, SET_COOKIE},
        request::Parts,
    },
    response::Response,
};
use bytes::Bytes;
use std::sync::Arc;

/// One inbound exchange: request data on one side, the response being built
/// on the other.
///
/// Created by the dispatcher for every request that matched a route and
/// discarded once the composed handler returns.
pub struct RequestContext {
    parts: Parts,
    path_params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    entity: Entity,
    status: StatusCode,
    response_headers: HeaderMap,
    body: Option<Bytes>,
    ended: bool,
    principal: Option<Principal>,
    sessions: SessionStore,
    session: Option<Arc<Session>>,
    /// The session was started by this exchange and is stored with its response.
    session_is_new: bool,
}

impl RequestContext {
    pub fn new(parts: Parts, sessions: SessionStore) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self {
            parts,
            path_params: Vec::new(),
            query,
            entity: Entity::default(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            body: None,
            ended: false,
            principal: None,
            sessions,
            session: None,
            session_is_new: false,
        }
    }

    pub(crate) fn set_path_params(&mut self, params: Vec<(String, String)>) {
        self.path_params = params;
    }

    pub(crate) fn set_entity(&mut self, entity: Entity) {
        self.entity = entity;
    }

    /// Give the request head back, e.g. to pass an unmatched request on.
    pub(crate) fn into_parts(self) -> Parts {
        self.parts
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// A request header as text; `None` when absent or not visible ASCII.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)?.to_str().ok()
    }

    /// Typed request extensions installed by outer tower layers.
    pub fn extensions(&self) -> &axum::http::Extensions {
        &self.parts.extensions
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// First value of a parameter; path captures win over the query string.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .chain(self.query.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a parameter, path captures first.
    pub fn params(&self, name: &str) -> Vec<&str> {
        self.path_params
            .iter()
            .chain(self.query.iter())
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name)?.to_str().ok()
    }

    /// Set a response header, replacing any previous value.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = header_pair(name, value)?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    /// Add a response header value, keeping earlier ones.
    pub fn append_response_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = header_pair(name, value)?;
        self.response_headers.append(name, value);
        Ok(())
    }

    /// Send `body` and end the exchange.
    pub fn send(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
        self.ended = true;
    }

    pub fn send_with_status(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.status = status;
        self.send(body);
    }

    /// Answer with `302 Found` pointing at `location` and end the exchange.
    pub fn send_redirect(&mut self, location: &str) -> Result<()> {
        self.set_response_header(LOCATION.as_str(), location)?;
        self.status = StatusCode::FOUND;
        self.end_exchange();
        Ok(())
    }

    /// End the exchange without (further) body.
    pub fn end_exchange(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub(crate) fn set_principal(&mut self, principal: Option<Principal>) {
        self.principal = principal;
    }

    /// The session bound to this request, created on first use.
    ///
    /// A new session is announced to the client with a `Set-Cookie` header and
    /// only kept if the exchange produces a response; a handler error drops it.
    pub fn session(&mut self) -> Arc<Session> {
        if let Some(session) = &self.session {
            return session.clone();
        }
        let existing = self
            .parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|h| session::cookie_value(h, self.sessions.cookie_name()))
            .and_then(|id| self.sessions.get(id));

        let session = match existing {
            Some(session) => session,
            None => {
                let session = self.sessions.detached();
                self.session_is_new = true;
                let cookie = format!(
                    "{}={}; Path=/; HttpOnly",
                    self.sessions.cookie_name(),
                    session.id()
                );
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    self.response_headers.append(SET_COOKIE, value);
                }
                tracing::debug!(session_id = %session.id(), "Created session");
                session
            }
        };
        self.session = Some(session.clone());
        session
    }

    pub fn into_response(self) -> Response {
        if let (true, Some(session)) = (self.session_is_new, &self.session) {
            self.sessions.adopt(session.clone());
        }
        let mut response = Response::new(self.body.map(Body::from).unwrap_or_else(Body::empty));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.response_headers;
        response
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = |message: String| SwitchyardError::InvalidHeader {
        name: name.to_string(),
        message,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

/// Bare context for unit tests.
#[cfg(test)]
pub(crate) fn test_context(method: Method, uri: &str) -> RequestContext {
    let (parts, _) = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .unwrap()
        .into_parts();
    RequestContext::new(parts, SessionStore::new("SWITCHYARDSESSION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;

    #[test]
    fn test_params_prefer_path_captures() {
        let mut ctx = test_context(Method::GET, "/customers/7?id=9&tag=a&tag=b");
        ctx.set_path_params(vec![("id".into(), "7".into())]);
        assert_eq!(ctx.param("id"), Some("7"));
        assert_eq!(ctx.params("id"), vec!["7", "9"]);
        assert_eq!(ctx.params("tag"), vec!["a", "b"]);
        assert_eq!(ctx.param("missing"), None);
    }

    #[test]
    fn test_send_redirect() {
        let mut ctx = test_context(Method::GET, "/old");
        ctx.send_redirect("/new").unwrap();
        assert!(ctx.is_ended());
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/new");
    }

    #[test]
    fn test_response_headers() {
        let mut ctx = test_context(Method::GET, "/");
        ctx.set_response_header("Content-Type", "text/plain").unwrap();
        ctx.set_response_header("content-type", "text/html").unwrap();
        assert_eq!(ctx.response_header("Content-Type"), Some("text/html"));
        assert!(ctx.set_response_header("bad header", "x").is_err());

        ctx.send_with_status(StatusCode::CREATED, "done");
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_session_reused_from_cookie() {
        let store = SessionStore::new("SID");
        let existing = store.create();
        existing.set("count", 4);

        let (parts, _) = axum::http::Request::builder()
            .uri("/")
            .header(COOKIE, format!("SID={}", existing.id()))
            .body(())
            .unwrap()
            .into_parts();
        let mut ctx = RequestContext::new(parts, store.clone());
        let session = ctx.session();
        assert_eq!(session.id(), existing.id());
        assert!(ctx.response_headers().get(SET_COOKIE).is_none());

        // unknown id starts over
        let mut fresh = test_context(Method::GET, "/");
        let session = fresh.session();
        assert!(session.is_empty());
        assert!(fresh.response_header("set-cookie").unwrap().starts_with("SWITCHYARDSESSION="));
    }

    #[test]
    fn test_new_session_is_stored_with_the_response() {
        let store = SessionStore::new("SID");
        let parts = || {
            axum::http::Request::builder()
                .uri("/")
                .body(())
                .unwrap()
                .into_parts()
                .0
        };

        let mut failed = RequestContext::new(parts(), store.clone());
        failed.session().set("x", 1);
        drop(failed);
        assert!(store.is_empty());

        let mut answered = RequestContext::new(parts(), store.clone());
        let id = answered.session().id().to_string();
        let response = answered.into_response();
        assert!(response.headers().get(SET_COOKIE).is_some());
        assert!(store.get(&id).is_some());
    }
}
