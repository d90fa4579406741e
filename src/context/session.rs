use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Idle time after which a session is discarded.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A server-side session. Attributes are JSON values.
#[derive(Debug)]
pub struct Session {
    id: String,
    attributes: DashMap<String, Value>,
    last_access: AtomicI64,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            attributes: DashMap::new(),
            last_access: AtomicI64::new(now_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.attributes.remove(name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Milliseconds since the epoch at the last lookup.
    pub fn last_access(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn touch(&self, now: i64) {
        self.last_access.store(now, Ordering::Relaxed);
    }

    fn expired(&self, now: i64, timeout: Duration) -> bool {
        now.saturating_sub(self.last_access()) > timeout.as_millis() as i64
    }
}

/// Sessions keyed by the id carried in the session cookie.
///
/// Sessions idle for longer than the timeout are evicted on lookup and by a
/// sweep that runs at most once per timeout period when sessions are created.
#[derive(Debug, Clone)]
pub struct SessionStore {
    cookie_name: Arc<str>,
    timeout: Duration,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    last_sweep: Arc<AtomicI64>,
}

impl SessionStore {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: Arc::from(cookie_name.into()),
            timeout: DEFAULT_SESSION_TIMEOUT,
            sessions: Arc::new(DashMap::new()),
            last_sweep: Arc::new(AtomicI64::new(now_millis())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A live session; an expired one is removed instead.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let now = now_millis();
        let session = self.sessions.get(id).map(|s| s.value().clone())?;
        if session.expired(now, self.timeout) {
            self.sessions.remove(id);
            tracing::debug!(session_id = %id, "Session expired");
            return None;
        }
        session.touch(now);
        Some(session)
    }

    /// Start and store a new session with a fresh id.
    pub fn create(&self) -> Arc<Session> {
        let session = self.detached();
        self.adopt(session.clone());
        session
    }

    /// A new session that is not stored until [`SessionStore::adopt`].
    pub(crate) fn detached(&self) -> Arc<Session> {
        Arc::new(Session::new(Uuid::new_v4().to_string()))
    }

    pub(crate) fn adopt(&self, session: Arc<Session>) {
        self.sweep_if_due();
        self.sessions.insert(session.id().to_string(), session);
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drop every expired session and return how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = now_millis();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.expired(now, self.timeout));
        self.last_sweep.store(now, Ordering::Relaxed);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Expired sessions evicted");
        }
        evicted
    }

    fn sweep_if_due(&self) {
        let now = now_millis();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.timeout.as_millis() as i64
            && self
                .last_sweep
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.evict_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Extract one cookie value from a `Cookie` request header.
pub(crate) fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim_matches('"'))
    })
}
