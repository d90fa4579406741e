use crate::context::DEFAULT_SESSION_TIMEOUT;
use crate::error::{Result, SwitchyardError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const WORKER_THREADS: &str = "SWITCHYARD_WORKER_THREADS";
pub const MAX_BODY_BYTES: &str = "SWITCHYARD_MAX_BODY_BYTES";
pub const SESSION_COOKIE: &str = "SWITCHYARD_SESSION_COOKIE";
pub const SESSION_TIMEOUT_SECS: &str = "SWITCHYARD_SESSION_TIMEOUT_SECS";
pub const TEMPLATE_DIR: &str = "SWITCHYARD_TEMPLATE_DIR";

/// Process-level settings for a dispatcher.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Threads in the worker pool that runs composed handlers.
    pub worker_threads: usize,
    /// Upper bound for a buffered request entity.
    pub max_body_bytes: usize,
    /// Cookie carrying the server-side session id.
    pub session_cookie: String,
    /// Idle time after which a session is evicted.
    pub session_timeout: Duration,
    /// Where the built-in mustache engine looks up template files.
    pub template_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_body_bytes: 10 * 1024 * 1024,
            session_cookie: "SWITCHYARDSESSION".to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            template_dir: PathBuf::from("templates"),
        }
    }
}

impl Settings {
    /// Load settings from `SWITCHYARD_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(value) = lookup(WORKER_THREADS) {
            settings.worker_threads = parse(WORKER_THREADS, &value)?;
            if settings.worker_threads == 0 {
                return Err(SwitchyardError::Settings {
                    name: WORKER_THREADS.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(value) = lookup(MAX_BODY_BYTES) {
            settings.max_body_bytes = parse(MAX_BODY_BYTES, &value)?;
        }
        if let Some(value) = lookup(SESSION_COOKIE) {
            settings.session_cookie = value;
        }
        if let Some(value) = lookup(SESSION_TIMEOUT_SECS) {
            settings.session_timeout = Duration::from_secs(parse(SESSION_TIMEOUT_SECS, &value)?);
        }
        if let Some(value) = lookup(TEMPLATE_DIR) {
            settings.template_dir = PathBuf::from(value);
        }
        Ok(settings)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SwitchyardError::Settings {
        name: name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert!(settings.worker_threads >= 1);
        assert_eq!(settings.session_cookie, "SWITCHYARDSESSION");
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (WORKER_THREADS, "3"),
            (MAX_BODY_BYTES, "1024"),
            (SESSION_COOKIE, "SID"),
            (SESSION_TIMEOUT_SECS, "90"),
            (TEMPLATE_DIR, "/srv/views"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.worker_threads, 3);
        assert_eq!(settings.max_body_bytes, 1024);
        assert_eq!(settings.session_cookie, "SID");
        assert_eq!(settings.session_timeout, Duration::from_secs(90));
        assert_eq!(settings.template_dir, PathBuf::from("/srv/views"));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Settings::from_lookup(|k| (k == WORKER_THREADS).then(|| "lots".to_string()));
        assert!(matches!(err, Err(SwitchyardError::Settings { .. })));

        let err = Settings::from_lookup(|k| (k == WORKER_THREADS).then(|| "0".to_string()));
        assert!(err.is_err());
    }
}
