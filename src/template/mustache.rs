use crate::config::Settings;
use crate::error::{Result, SwitchyardError};
use crate::template::{Template, TemplateProvider};
use crate::value::TemplateData;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Mustache engine, registered as `"mustache"`; the default `template_type`.
///
/// Templates come from raw sources added up front or, failing that, from
/// files under the template directory. Each is compiled once, when the
/// route naming it is registered.
pub struct MustacheTemplateProvider {
    root: Option<PathBuf>,
    sources: RwLock<HashMap<String, String>>,
}

impl MustacheTemplateProvider {
    pub const NAME: &'static str = "mustache";

    pub fn new() -> Self {
        Self {
            root: None,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve template names as paths relative to `root`.
    pub fn from_dir(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            ..Self::new()
        }
    }

    pub fn with_raw_template(self, name: &str, content: &str) -> Result<Self> {
        compile(name, content)?;
        self.sources
            .write()
            .map_err(|_| template_error(name, "engine lock poisoned"))?
            .insert(name.to_string(), content.to_string());
        Ok(self)
    }

    fn source(&self, name: &str) -> Result<String> {
        let raw = self
            .sources
            .read()
            .map_err(|_| template_error(name, "engine lock poisoned"))?
            .get(name)
            .cloned();
        if let Some(source) = raw {
            return Ok(source);
        }
        let Some(root) = &self.root else {
            return Err(template_error(name, "template not found"));
        };
        let path = root.join(name);
        std::fs::read_to_string(&path).map_err(|e| {
            template_error(name, format!("cannot read {}: {e}", path.display()))
        })
    }
}

impl Default for MustacheTemplateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateProvider for MustacheTemplateProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(&self, _settings: &Settings) -> Result<()> {
        if let Some(root) = &self.root {
            tracing::debug!(root = %root.display(), "Mustache template directory");
        }
        Ok(())
    }

    fn get_template(&self, name: &str) -> Result<Arc<dyn Template>> {
        let template = compile(name, &self.source(name)?)?;
        Ok(Arc::new(MustacheTemplate {
            name: name.to_string(),
            template,
        }))
    }
}

struct MustacheTemplate {
    name: String,
    template: ::mustache::Template,
}

impl Template for MustacheTemplate {
    fn apply(&self, data: &TemplateData) -> Result<String> {
        let mut out = Vec::new();
        self.template
            .render(&mut out, data)
            .map_err(|e| template_error(&self.name, e.to_string()))?;
        String::from_utf8(out).map_err(|e| template_error(&self.name, e.to_string()))
    }
}

fn compile(name: &str, content: &str) -> Result<::mustache::Template> {
    ::mustache::compile_str(content).map_err(|e| template_error(name, e.to_string()))
}

fn template_error(name: &str, message: impl Into<String>) -> SwitchyardError {
    SwitchyardError::Template {
        name: name.to_string(),
        message: message.into(),
    }
}
