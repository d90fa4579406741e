use crate::config::Settings;
use crate::error::{Result, SwitchyardError};
use crate::template::{Template, TemplateProvider};
use crate::value::TemplateData;
use std::sync::{Arc, RwLock};

/// Tera-backed engine, registered as `"tera"`.
pub struct TeraTemplateProvider {
    tera: Arc<RwLock<::tera::Tera>>,
}

impl TeraTemplateProvider {
    pub const NAME: &'static str = "tera";

    pub fn new() -> Self {
        Self {
            tera: Arc::new(RwLock::new(::tera::Tera::default())),
        }
    }

    /// Load every template matching `pattern`, e.g. `"templates/**/*.html"`.
    pub fn from_glob(pattern: &str) -> Result<Self> {
        let tera = ::tera::Tera::new(pattern).map_err(|e| SwitchyardError::Template {
            name: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            tera: Arc::new(RwLock::new(tera)),
        })
    }

    pub fn with_raw_template(self, name: &str, content: &str) -> Result<Self> {
        {
            let mut tera = self
                .tera
                .write()
                .map_err(|_| template_error(name, "engine lock poisoned"))?;
            tera.add_raw_template(name, content)
                .map_err(|e| template_error(name, e.to_string()))?;
        }
        Ok(self)
    }
}

impl Default for TeraTemplateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateProvider for TeraTemplateProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(&self, _settings: &Settings) -> Result<()> {
        let tera = self
            .tera
            .read()
            .map_err(|_| template_error(Self::NAME, "engine lock poisoned"))?;
        tracing::info!(
            templates = tera.get_template_names().count(),
            "Tera templates loaded"
        );
        Ok(())
    }

    fn get_template(&self, name: &str) -> Result<Arc<dyn Template>> {
        let tera = self
            .tera
            .read()
            .map_err(|_| template_error(name, "engine lock poisoned"))?;
        if !tera.get_template_names().any(|loaded| loaded == name) {
            return Err(template_error(name, "template not found"));
        }
        Ok(Arc::new(TeraTemplate {
            tera: self.tera.clone(),
            name: name.to_string(),
        }))
    }
}

struct TeraTemplate {
    tera: Arc<RwLock<::tera::Tera>>,
    name: String,
}

impl Template for TeraTemplate {
    fn apply(&self, data: &TemplateData) -> Result<String> {
        // Tera contexts are keyed; anything else is exposed as `data`.
        let context = match data {
            TemplateData::Map(_) => ::tera::Context::from_serialize(data)
                .map_err(|e| template_error(&self.name, e.to_string()))?,
            other => {
                let mut context = ::tera::Context::new();
                context.insert("data", other);
                context
            }
        };
        let tera = self
            .tera
            .read()
            .map_err(|_| template_error(&self.name, "engine lock poisoned"))?;
        tera.render(&self.name, &context)
            .map_err(|e| template_error(&self.name, e.to_string()))
    }
}

fn template_error(name: &str, message: impl Into<String>) -> SwitchyardError {
    SwitchyardError::Template {
        name: name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::to_template_data;
    use serde_json::json;

    #[test]
    fn test_renders_map_data() {
        let provider = TeraTemplateProvider::new()
            .with_raw_template("hello.html", "Hello {{ name }}: {% for t in tags %}[{{ t }}]{% endfor %}")
            .unwrap();
        let template = provider.get_template("hello.html").unwrap();
        let data = to_template_data(&json!({"name": "Stuart", "tags": ["a", "b"]}));
        assert_eq!(template.apply(&data).unwrap(), "Hello Stuart: [a][b]");
    }

    #[test]
    fn test_non_map_data_is_exposed_as_data() {
        let provider = TeraTemplateProvider::new()
            .with_raw_template("list.html", "{{ data | length }}")
            .unwrap();
        let template = provider.get_template("list.html").unwrap();
        let data = to_template_data(&json!([1, 2, 3]));
        assert_eq!(template.apply(&data).unwrap(), "3");
    }

    #[test]
    fn test_missing_template_fails_lookup() {
        let provider = TeraTemplateProvider::new();
        assert!(matches!(
            provider.get_template("nope.html"),
            Err(SwitchyardError::Template { .. })
        ));
    }
}
