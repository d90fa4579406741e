use crate::error::{Result, SwitchyardError};
use crate::value::Injected;
use bytes::Bytes;
use serde_json::Value;

/// The buffered request body.
///
/// `multipart/form-data` bodies arrive already decoded in `form`; everything
/// else is kept raw and parsed on demand.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    data: Bytes,
    content_type: Option<String>,
    form: Option<FormData>,
}

impl Entity {
    pub fn new(data: Bytes, content_type: Option<String>) -> Self {
        Self {
            data,
            content_type,
            form: None,
        }
    }

    pub fn multipart(form: FormData) -> Self {
        Self {
            data: Bytes::new(),
            content_type: Some("multipart/form-data".to_string()),
            form: Some(form),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.form.is_none()
    }

    pub fn as_string(&self) -> Result<String> {
        String::from_utf8(self.data.to_vec())
            .map_err(|e| SwitchyardError::MalformedEntity(format!("body is not UTF-8: {e}")))
    }

    /// The body as JSON; an empty body is `Null`.
    pub fn as_json(&self) -> Result<Value> {
        if self.data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.data)
            .map_err(|e| SwitchyardError::MalformedEntity(format!("body is not JSON: {e}")))
    }

    /// Form fields, from a decoded multipart body or a urlencoded one.
    pub fn as_form(&self) -> FormData {
        if let Some(form) = &self.form {
            return form.clone();
        }
        let fields = url::form_urlencoded::parse(&self.data)
            .map(|(name, value)| FormField {
                name: name.into_owned(),
                value: FormValue::Text(value.into_owned()),
            })
            .collect();
        FormData { fields }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

/// Decoded form fields in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    fields: Vec<FormField>,
}

impl FormData {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormField> {
        self.fields.iter().filter(|f| f.name == name).collect()
    }

    /// First text value of a field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get_all(name).into_iter().find_map(|f| match &f.value {
            FormValue::Text(text) => Some(text.as_str()),
            FormValue::File { .. } => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// How a `$entity:<kind>` specifier reads the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    String,
    Json,
    Form,
    Raw,
}

impl EntityKind {
    pub(crate) fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "string" => EntityKind::String,
            "json" => EntityKind::Json,
            "form" => EntityKind::Form,
            _ => EntityKind::Raw,
        }
    }

    pub(crate) fn read(self, entity: &Entity) -> Result<Injected> {
        Ok(match self {
            EntityKind::String => Injected::new(entity.as_string()?),
            EntityKind::Json => match entity.as_json()? {
                Value::Null => Injected::null(),
                value => Injected::new(value),
            },
            EntityKind::Form => Injected::new(entity.as_form()),
            EntityKind::Raw => Injected::new(entity.data().clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_entity() {
        let entity = Entity::new(Bytes::from_static(br#"{"v":1}"#), None);
        let value = EntityKind::Json.read(&entity).unwrap();
        assert_eq!(value.as_json(), Some(&json!({"v": 1})));

        let empty = Entity::default();
        assert!(EntityKind::Json.read(&empty).unwrap().is_null());

        let broken = Entity::new(Bytes::from_static(b"{nope"), None);
        assert!(matches!(
            EntityKind::Json.read(&broken),
            Err(SwitchyardError::MalformedEntity(_))
        ));
    }

    #[test]
    fn test_urlencoded_form() {
        let entity = Entity::new(Bytes::from_static(b"name=Bob&tag=a&tag=b%20c"), None);
        let form = entity.as_form();
        assert_eq!(form.text("name"), Some("Bob"));
        assert_eq!(form.get_all("tag").len(), 2);
        assert_eq!(
            form.get_all("tag")[1].value,
            FormValue::Text("b c".to_string())
        );
    }

    #[test]
    fn test_unknown_kind_is_raw() {
        assert_eq!(EntityKind::from_suffix(""), EntityKind::Raw);
        assert_eq!(EntityKind::from_suffix("xml"), EntityKind::Raw);
        let entity = Entity::new(Bytes::from_static(b"\x00\x01"), None);
        let raw = EntityKind::Raw.read(&entity).unwrap();
        assert_eq!(raw.downcast_ref::<Bytes>().unwrap().as_ref(), b"\x00\x01");
    }
}
