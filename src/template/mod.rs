//! Template engines for routes declaring `template`.
//!
//! Engines are looked up by the route's `template_type`. A mustache engine
//! reading from `Settings::template_dir` is always available unless one named
//! `mustache` is registered explicitly. A route's template is compiled when
//! the route is registered, so a missing engine or template fails
//! registration instead of the first request.

mod engine;
mod mustache;

pub use engine::TeraTemplateProvider;
pub use self::mustache::MustacheTemplateProvider;

use crate::config::Settings;
use crate::error::Result;
use crate::value::TemplateData;
use std::sync::Arc;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// A compiled template.
pub trait Template: Send + Sync {
    fn apply(&self, data: &TemplateData) -> Result<String>;
}

/// A template engine registered under [`TemplateProvider::name`].
pub trait TemplateProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once when the registry is built.
    fn init(&self, _settings: &Settings) -> Result<()> {
        Ok(())
    }

    fn get_template(&self, name: &str) -> Result<Arc<dyn Template>>;

    /// Called once when the dispatcher stops.
    fn cleanup(&self) {}
}
