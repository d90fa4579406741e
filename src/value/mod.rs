//! Values flowing in and out of handlers.
//!
//! - [`Injected`]: a type-erased value produced by an injection specifier.
//! - [`HandlerResult`]: what a terminal handler hands back for the response.
//! - [`TemplateData`]: the engine-neutral shape passed to templates.
//! - [`Serializer`]: turns structured results into wire text.

use crate::error::{Result, SwitchyardError};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value produced by an injection specifier, or null.
///
/// Providers may hand out anything; consumers recover the concrete type with
/// [`Injected::get`] or [`Injected::downcast_ref`].
#[derive(Clone, Default)]
pub struct Injected(Option<Arc<dyn Any + Send + Sync>>);

impl Injected {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some(value))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Shared handle to the value if it is a `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone()?.downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    pub fn as_json(&self) -> Option<&Value> {
        self.downcast_ref::<Value>()
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Injected(null)")
        } else if let Some(s) = self.as_str() {
            write!(f, "Injected({s:?})")
        } else if let Some(v) = self.as_json() {
            write!(f, "Injected({v})")
        } else {
            f.write_str("Injected(..)")
        }
    }
}

/// Outcome of a terminal handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HandlerResult {
    /// Nothing to send; the handler produced its own response or none at all.
    #[default]
    Empty,
    /// Sent verbatim.
    Text(String),
    /// Rendered through the route template, or serialized.
    Structured(Value),
}

impl HandlerResult {
    /// Capture any serializable host object as a structured result.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(HandlerResult::from)
            .map_err(|e| SwitchyardError::Internal(format!("result serialization: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, HandlerResult::Empty)
    }
}

impl From<()> for HandlerResult {
    fn from(_: ()) -> Self {
        HandlerResult::Empty
    }
}

impl From<String> for HandlerResult {
    fn from(value: String) -> Self {
        HandlerResult::Text(value)
    }
}

impl From<&str> for HandlerResult {
    fn from(value: &str) -> Self {
        HandlerResult::Text(value.to_string())
    }
}

impl From<Value> for HandlerResult {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => HandlerResult::Empty,
            Value::String(text) => HandlerResult::Text(text),
            other => HandlerResult::Structured(other),
        }
    }
}

impl<T: Into<HandlerResult>> From<Option<T>> for HandlerResult {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Engine-neutral data handed to a template: sequences become ordered lists,
/// mappings become keyed maps, scalars pass through.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemplateData {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<TemplateData>),
    Map(BTreeMap<String, TemplateData>),
}

impl TemplateData {
    pub fn get(&self, key: &str) -> Option<&TemplateData> {
        match self {
            TemplateData::Map(map) => map.get(key),
            _ => None,
        }
    }
}

pub fn to_template_data(value: &Value) -> TemplateData {
    match value {
        Value::Null => TemplateData::Null,
        Value::Bool(b) => TemplateData::Bool(*b),
        Value::Number(n) => TemplateData::Number(n.clone()),
        Value::String(s) => TemplateData::String(s.clone()),
        Value::Array(items) => TemplateData::List(items.iter().map(to_template_data).collect()),
        Value::Object(fields) => TemplateData::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_template_data(v)))
                .collect(),
        ),
    }
}

/// Structural-to-wire serialization for handler results and channel frames.
pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, value: &Value) -> Result<String>;

    fn content_type(&self) -> &str {
        "application/json"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| SwitchyardError::Internal(e.to_string()))
    }
}
