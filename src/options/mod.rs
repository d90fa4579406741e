//! Per-route options and process-wide defaults.
//!
//! Recognized keys are enumerated by [`ConfigKey`]; anything else is rejected
//! when the route or wrapper is registered.

use crate::error::{Result, SwitchyardError};
use crate::predicate::PredicateSource;
use axum::http::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

pub const DEFAULT_TEMPLATE_TYPE: &str = "mustache";
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigKey {
    Template,
    TemplateType,
    Headers,
    Predicate,
    RolesAllowed,
    Transactional,
}

impl ConfigKey {
    pub fn parse(name: &str) -> Result<Self> {
        ConfigKey::from_str(name).map_err(|_| SwitchyardError::UnknownOption {
            name: name.to_string(),
        })
    }

    fn check(self, value: &OptionValue) -> Result<()> {
        let ok = match self {
            ConfigKey::Template | ConfigKey::TemplateType => matches!(value, OptionValue::Text(_)),
            ConfigKey::Headers => matches!(value, OptionValue::Map(_)),
            ConfigKey::Predicate => {
                matches!(value, OptionValue::Text(_) | OptionValue::Predicate(_))
            }
            ConfigKey::RolesAllowed => {
                matches!(value, OptionValue::Text(_) | OptionValue::List(_))
            }
            ConfigKey::Transactional => matches!(value, OptionValue::Bool(_)),
        };
        if ok {
            Ok(())
        } else {
            Err(SwitchyardError::invalid_option(
                self.as_ref(),
                format!("unexpected {} value", value.kind()),
            ))
        }
    }
}

/// A raw option value as supplied at registration.
#[derive(Debug, Clone)]
pub enum OptionValue {
    Text(String),
    List(Vec<String>),
    Map(Vec<(String, String)>),
    Bool(bool),
    Predicate(PredicateSource),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            OptionValue::Text(_) => "string",
            OptionValue::List(_) => "list",
            OptionValue::Map(_) => "mapping",
            OptionValue::Bool(_) => "boolean",
            OptionValue::Predicate(_) => "predicate",
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(value: Vec<&str>) -> Self {
        OptionValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for OptionValue {
    fn from(value: [(&str, &str); N]) -> Self {
        OptionValue::Map(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl From<PredicateSource> for OptionValue {
    fn from(value: PredicateSource) -> Self {
        OptionValue::Predicate(value)
    }
}

/// Options for one registration, checked against [`ConfigKey`] when the
/// route is registered.
#[derive(Debug, Clone, Default)]
pub struct Options {
    entries: Vec<(String, OptionValue)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn template(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.set(ConfigKey::Template.as_ref(), name)
    }

    pub fn template_type(self, engine: impl Into<String>) -> Self {
        let engine: String = engine.into();
        self.set(ConfigKey::TemplateType.as_ref(), engine)
    }

    /// Add one response header; repeated calls accumulate.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (name.into(), value.into());
        let existing = self
            .entries
            .iter_mut()
            .find(|(k, _)| k == ConfigKey::Headers.as_ref());
        match existing {
            Some((_, OptionValue::Map(headers))) => headers.push(pair),
            _ => self
                .entries
                .push((ConfigKey::Headers.to_string(), OptionValue::Map(vec![pair]))),
        }
        self
    }

    pub fn predicate(self, predicate: impl Into<PredicateSource>) -> Self {
        self.set(
            ConfigKey::Predicate.as_ref(),
            OptionValue::Predicate(predicate.into()),
        )
    }

    pub fn roles_allowed<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        self.set(ConfigKey::RolesAllowed.as_ref(), roles)
    }

    pub fn transactional(self, enabled: bool) -> Self {
        self.set(ConfigKey::Transactional.as_ref(), enabled)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Predicate-only shorthand: `sy.on_get_with("/x", "path[/x]", spec)`.
impl From<&str> for Options {
    fn from(expression: &str) -> Self {
        Options::new().predicate(expression)
    }
}

impl From<PredicateSource> for Options {
    fn from(predicate: PredicateSource) -> Self {
        Options::new().predicate(predicate)
    }
}

/// Options written as a JSON object, e.g. loaded from a route table file.
impl TryFrom<serde_json::Value> for Options {
    type Error = SwitchyardError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        let Value::Object(fields) = value else {
            return Err(SwitchyardError::invalid_option(
                "options",
                "expected an object",
            ));
        };
        let mut options = Options::new();
        for (name, value) in fields {
            let bad = |what: &str| SwitchyardError::invalid_option(name.clone(), what.to_string());
            let value = match value {
                Value::String(s) if name == ConfigKey::Predicate.as_ref() => {
                    OptionValue::Predicate(PredicateSource::Expression(s))
                }
                Value::String(s) => OptionValue::Text(s),
                Value::Bool(b) => OptionValue::Bool(b),
                Value::Array(items) => OptionValue::List(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s),
                            _ => Err(bad("list items must be strings")),
                        })
                        .collect::<Result<_>>()?,
                ),
                Value::Object(map) => OptionValue::Map(
                    map.into_iter()
                        .map(|(k, v)| match v {
                            Value::String(s) => Ok((k, s)),
                            _ => Err(bad("mapping values must be strings")),
                        })
                        .collect::<Result<_>>()?,
                ),
                Value::Null | Value::Number(_) => return Err(bad("unsupported value")),
            };
            options.entries.push((name, value));
        }
        Ok(options)
    }
}

/// Process-wide defaults merged under every registration.
#[derive(Debug, Clone)]
pub struct Defaults {
    values: HashMap<ConfigKey, OptionValue>,
}

impl Default for Defaults {
    fn default() -> Self {
        let mut values = HashMap::new();
        values.insert(
            ConfigKey::TemplateType,
            OptionValue::from(DEFAULT_TEMPLATE_TYPE),
        );
        values.insert(
            ConfigKey::Headers,
            OptionValue::Map(vec![(
                CONTENT_TYPE.to_string(),
                DEFAULT_CONTENT_TYPE.to_string(),
            )]),
        );
        values.insert(ConfigKey::Transactional, OptionValue::Bool(false));
        Self { values }
    }
}

impl Defaults {
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<()> {
        let key = ConfigKey::parse(name)?;
        key.check(&value)?;
        self.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: ConfigKey) -> Option<&OptionValue> {
        self.values.get(&key)
    }
}

/// Validated configuration of one route or wrapper.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub template: Option<String>,
    pub template_type: String,
    /// Default headers first, then the registration's own (same name replaces).
    pub headers: Vec<(String, String)>,
    /// The registration itself named a Content-Type.
    pub content_type_explicit: bool,
    pub predicate: Option<PredicateSource>,
    pub roles_allowed: Vec<String>,
    pub transactional: bool,
}

impl HandlerConfig {
    pub fn validate(options: &Options, defaults: &Defaults) -> Result<Self> {
        let mut given: HashMap<ConfigKey, &OptionValue> = HashMap::new();
        for (name, value) in &options.entries {
            let key = ConfigKey::parse(name)?;
            key.check(value)?;
            given.insert(key, value);
        }

        let lookup = |key: ConfigKey| given.get(&key).copied().or_else(|| defaults.get(key));

        let text = |key: ConfigKey| match lookup(key) {
            Some(OptionValue::Text(s)) => Some(s.clone()),
            _ => None,
        };

        let mut headers: Vec<(String, String)> = match defaults.get(ConfigKey::Headers) {
            Some(OptionValue::Map(map)) => map.clone(),
            _ => Vec::new(),
        };
        let mut content_type_explicit = false;
        if let Some(OptionValue::Map(own)) = given.get(&ConfigKey::Headers) {
            for (name, value) in own {
                if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                    content_type_explicit = true;
                }
                headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
                headers.push((name.clone(), value.clone()));
            }
        }

        let predicate = match lookup(ConfigKey::Predicate) {
            Some(OptionValue::Predicate(p)) => Some(p.clone()),
            Some(OptionValue::Text(expression)) => {
                Some(PredicateSource::Expression(expression.clone()))
            }
            _ => None,
        };

        let roles_allowed = match lookup(ConfigKey::RolesAllowed) {
            Some(OptionValue::Text(role)) => vec![role.clone()],
            Some(OptionValue::List(roles)) => roles.clone(),
            _ => Vec::new(),
        };

        let transactional = matches!(lookup(ConfigKey::Transactional), Some(OptionValue::Bool(true)));

        Ok(Self {
            template: text(ConfigKey::Template),
            template_type: text(ConfigKey::TemplateType)
                .unwrap_or_else(|| DEFAULT_TEMPLATE_TYPE.to_string()),
            headers,
            content_type_explicit,
            predicate,
            roles_allowed,
            transactional,
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            .map(|(_, value)| value.as_str())
    }
}
