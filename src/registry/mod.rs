//! The registration DSL.
//!
//! Registration happens once, before traffic. Every call validates its
//! options and compiles what it can, so a bad route fails here rather than on
//! its first request. [`Switchyard::into_dispatcher`] freezes the result.
//!
//! ```rust,ignore
//! let mut sy = Switchyard::builder()
//!     .authenticator(BasicAuthenticator::new("app").with_user("ann", "pw", ["admin"]))
//!     .build()?;
//!
//! sy.alias("body", "$entity:json")?
//!     .on_get("/hello/{name}", route(|ctx, _| Ok(format!("hello {}", ctx.param("name").unwrap_or("?")))))?
//!     .on_post_with("/admin", Options::new().roles_allowed(["admin"]), route_with(["body"], |_, args| {
//!         Ok(args[0].as_json().cloned())
//!     }))?;
//!
//! let router = sy.into_dispatcher().into_router();
//! ```

use crate::channel::ChannelRoute;
use crate::config::Settings;
use crate::context::SessionStore;
use crate::dispatch::{DispatchState, Dispatcher};
use crate::error::{Result, SwitchyardError};
use crate::guard::{Authenticator, RolesAllowed};
use crate::handler::{ChannelFn, HandlerSpec, RouteFn, RouteHandler, WrapperFn};
use crate::inject::{InjectionProvider, Injector, PostProcessor};
use crate::interceptor::{Handler, HandlerWrapper, WrapperEntry, compose_chain};
use crate::options::{Defaults, HandlerConfig, OptionValue, Options};
use crate::predicate::{Predicate, PredicateParser, PredicateSource};
use crate::routing::{PathPattern, RouteEntry};
use crate::sql::sql_post_processor;
use crate::template::{HTML_CONTENT_TYPE, MustacheTemplateProvider, Template, TemplateProvider};
use crate::transactional::{TransactionManager, TransactionOptions};
use crate::value::{Injected, JsonSerializer, Serializer};
use crate::worker::WorkerPool;
use axum::http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, info};

/// Collaborators a [`Switchyard`] is built from.
pub struct SwitchyardBuilder {
    providers: Vec<Arc<dyn InjectionProvider>>,
    post_processors: Vec<PostProcessor>,
    template_providers: Vec<Arc<dyn TemplateProvider>>,
    handler_wrappers: Vec<Arc<dyn HandlerWrapper>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    transaction_options: TransactionOptions,
    predicate_parser: Option<Arc<dyn PredicateParser>>,
    serializer: Arc<dyn Serializer>,
    settings: Settings,
    worker_pool: Option<WorkerPool>,
}

impl SwitchyardBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            post_processors: vec![sql_post_processor()],
            template_providers: Vec::new(),
            handler_wrappers: Vec::new(),
            authenticator: None,
            transaction_manager: None,
            transaction_options: TransactionOptions::default(),
            predicate_parser: None,
            serializer: Arc::new(JsonSerializer),
            settings: Settings::default(),
            worker_pool: None,
        }
    }

    pub fn provider(mut self, provider: impl InjectionProvider) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Runs after the built-in post-processors, in registration order.
    pub fn post_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(Injected) -> Injected + Send + Sync + 'static,
    {
        self.post_processors.push(Arc::new(f));
        self
    }

    pub fn template_provider(mut self, provider: impl TemplateProvider) -> Self {
        self.template_providers.push(Arc::new(provider));
        self
    }

    pub fn handler_wrapper(mut self, wrapper: impl HandlerWrapper) -> Self {
        self.handler_wrappers.push(Arc::new(wrapper));
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn transaction_manager(mut self, manager: impl TransactionManager) -> Self {
        self.transaction_manager = Some(Arc::new(manager));
        self
    }

    /// Options every transactional route begins its transaction with.
    pub fn transaction_options(mut self, options: TransactionOptions) -> Self {
        self.transaction_options = options;
        self
    }

    pub fn predicate_parser(mut self, parser: impl PredicateParser) -> Self {
        self.predicate_parser = Some(Arc::new(parser));
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Share an existing pool instead of creating one from the settings.
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn build(mut self) -> Result<Switchyard> {
        if !self
            .template_providers
            .iter()
            .any(|p| p.name() == MustacheTemplateProvider::NAME)
        {
            self.template_providers.push(Arc::new(MustacheTemplateProvider::from_dir(
                &self.settings.template_dir,
            )));
        }
        let pool = match self.worker_pool {
            Some(pool) => pool,
            None => WorkerPool::new(self.settings.worker_threads)?,
        };
        for provider in &self.template_providers {
            provider.init(&self.settings)?;
            debug!(engine = provider.name(), "Template engine initialised");
        }

        Ok(Switchyard {
            injector: Injector::new(self.providers, self.post_processors),
            defaults: Defaults::default(),
            routes: Vec::new(),
            wrappers: Vec::new(),
            channels: Vec::new(),
            template_providers: self.template_providers,
            handler_wrappers: self.handler_wrappers,
            authenticator: self.authenticator,
            transaction_manager: self.transaction_manager,
            transaction_options: self.transaction_options,
            predicate_parser: self.predicate_parser,
            serializer: self.serializer,
            sessions: SessionStore::new(self.settings.session_cookie.clone())
                .with_timeout(self.settings.session_timeout),
            settings: self.settings,
            pool,
        })
    }
}

impl Default for SwitchyardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A route whose wrappers are applied when the registry is frozen.
struct PendingRoute {
    method: Method,
    pattern: PathPattern,
    predicate: Option<Arc<dyn Predicate>>,
    terminal: Handler,
}

/// Registry of routes, wrappers, aliases and defaults.
pub struct Switchyard {
    injector: Injector,
    defaults: Defaults,
    routes: Vec<PendingRoute>,
    wrappers: Vec<WrapperEntry>,
    channels: Vec<Arc<ChannelRoute>>,
    template_providers: Vec<Arc<dyn TemplateProvider>>,
    handler_wrappers: Vec<Arc<dyn HandlerWrapper>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    transaction_options: TransactionOptions,
    predicate_parser: Option<Arc<dyn PredicateParser>>,
    serializer: Arc<dyn Serializer>,
    sessions: SessionStore,
    settings: Settings,
    pool: WorkerPool,
}

impl Switchyard {
    pub fn builder() -> SwitchyardBuilder {
        SwitchyardBuilder::new()
    }

    pub fn on_get(&mut self, path: &str, spec: HandlerSpec<RouteFn>) -> Result<&mut Self> {
        self.on_request(Method::GET, path, Options::new(), spec)
    }

    pub fn on_post(&mut self, path: &str, spec: HandlerSpec<RouteFn>) -> Result<&mut Self> {
        self.on_request(Method::POST, path, Options::new(), spec)
    }

    pub fn on_put(&mut self, path: &str, spec: HandlerSpec<RouteFn>) -> Result<&mut Self> {
        self.on_request(Method::PUT, path, Options::new(), spec)
    }

    pub fn on_delete(&mut self, path: &str, spec: HandlerSpec<RouteFn>) -> Result<&mut Self> {
        self.on_request(Method::DELETE, path, Options::new(), spec)
    }

    pub fn on_get_with(
        &mut self,
        path: &str,
        options: impl Into<Options>,
        spec: HandlerSpec<RouteFn>,
    ) -> Result<&mut Self> {
        self.on_request(Method::GET, path, options, spec)
    }

    pub fn on_post_with(
        &mut self,
        path: &str,
        options: impl Into<Options>,
        spec: HandlerSpec<RouteFn>,
    ) -> Result<&mut Self> {
        self.on_request(Method::POST, path, options, spec)
    }

    pub fn on_put_with(
        &mut self,
        path: &str,
        options: impl Into<Options>,
        spec: HandlerSpec<RouteFn>,
    ) -> Result<&mut Self> {
        self.on_request(Method::PUT, path, options, spec)
    }

    pub fn on_delete_with(
        &mut self,
        path: &str,
        options: impl Into<Options>,
        spec: HandlerSpec<RouteFn>,
    ) -> Result<&mut Self> {
        self.on_request(Method::DELETE, path, options, spec)
    }

    /// Register a route. Routes sharing a path are tried in registration order.
    pub fn on_request(
        &mut self,
        method: Method,
        path: &str,
        options: impl Into<Options>,
        spec: HandlerSpec<RouteFn>,
    ) -> Result<&mut Self> {
        let pattern = PathPattern::parse(path)?;
        let config = HandlerConfig::validate(&options.into(), &self.defaults)?;
        let predicate = self.compile_predicate(config.predicate.as_ref())?;

        let template = match &config.template {
            Some(name) => Some(self.template(&config.template_type, name, path)?),
            None => None,
        };

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            headers.push(header_pair(name, value)?);
        }
        let mut default_content_type = None;
        if !config.content_type_explicit {
            if template.is_some() {
                headers.retain(|(name, _)| *name != CONTENT_TYPE);
                headers.push((CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE)));
            } else {
                default_content_type = headers
                    .iter()
                    .find(|(name, _)| *name == CONTENT_TYPE)
                    .map(|(_, value)| value.clone());
            }
        }

        let roles = RolesAllowed::new(config.roles_allowed.iter().cloned());
        if !roles.is_empty() && self.authenticator.is_none() {
            return Err(SwitchyardError::missing("authenticator", path));
        }
        let transactions = match (config.transactional, &self.transaction_manager) {
            (false, _) => None,
            (true, Some(manager)) => Some((manager.clone(), self.transaction_options.clone())),
            (true, None) => return Err(SwitchyardError::missing("transaction manager", path)),
        };

        let handler = RouteHandler {
            function: spec.function().clone(),
            injections: self.injector.bind(spec.specifiers()),
            template,
            headers,
            default_content_type,
            roles,
            authenticator: self.authenticator.clone(),
            transactions,
            serializer: self.serializer.clone(),
        };

        info!(%method, path, injections = spec.specifiers().len(), "Route registered");
        self.routes.push(PendingRoute {
            method,
            pattern,
            predicate,
            terminal: handler.into_handler(),
        });
        Ok(self)
    }

    /// Register a wrapper around every route.
    pub fn wrapper(&mut self, spec: HandlerSpec<WrapperFn>) -> Result<&mut Self> {
        self.push_wrapper(None, spec)
    }

    /// Register a wrapper that only runs for requests `predicate` accepts.
    pub fn wrapper_when(
        &mut self,
        predicate: impl Into<PredicateSource>,
        spec: HandlerSpec<WrapperFn>,
    ) -> Result<&mut Self> {
        self.push_wrapper(Some(predicate.into()), spec)
    }

    fn push_wrapper(
        &mut self,
        predicate: Option<PredicateSource>,
        spec: HandlerSpec<WrapperFn>,
    ) -> Result<&mut Self> {
        let predicate = self.compile_predicate(predicate.as_ref())?;
        debug!(
            position = self.wrappers.len(),
            gated = predicate.is_some(),
            "Wrapper registered"
        );
        self.wrappers.push(WrapperEntry::new(
            predicate,
            self.injector.bind(spec.specifiers()),
            spec.function().clone(),
        ));
        Ok(self)
    }

    /// Name a resolver for later specifiers.
    pub fn alias(&mut self, name: &str, specifier: &str) -> Result<&mut Self> {
        debug!(alias = name, specifier, "Alias registered");
        self.injector.alias(name, specifier);
        Ok(self)
    }

    /// Change a default for routes registered afterwards.
    pub fn set_default(
        &mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> Result<&mut Self> {
        self.defaults.set(name, value.into())?;
        Ok(self)
    }

    /// Register a channel handler for websocket upgrades on `path`.
    pub fn websocket(&mut self, path: &str, spec: HandlerSpec<ChannelFn>) -> Result<&mut Self> {
        let pattern = PathPattern::parse(path)?;
        info!(path, "Channel registered");
        self.channels.push(Arc::new(ChannelRoute {
            pattern,
            function: spec.function().clone(),
            injections: self.injector.bind(spec.specifiers()),
        }));
        Ok(self)
    }

    /// Resolve one specifier now, outside any request.
    pub fn resolve(&self, specifier: &str) -> Result<Injected> {
        self.injector.resolve_manual(specifier)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Compose every route with the registered wrappers and freeze the table.
    pub fn into_dispatcher(self) -> Dispatcher {
        let routes = self
            .routes
            .into_iter()
            .map(|route| RouteEntry {
                method: route.method,
                pattern: route.pattern,
                predicate: route.predicate,
                handler: compose_chain(route.terminal, &self.wrappers, &self.handler_wrappers),
            })
            .collect();

        Dispatcher::new(DispatchState {
            routes,
            channels: self.channels,
            pool: self.pool,
            sessions: self.sessions,
            settings: self.settings,
            serializer: self.serializer,
            template_providers: self.template_providers,
        })
    }

    fn compile_predicate(
        &self,
        source: Option<&PredicateSource>,
    ) -> Result<Option<Arc<dyn Predicate>>> {
        source
            .map(|p| p.compile(self.predicate_parser.as_deref()))
            .transpose()
    }

    fn template(&self, engine: &str, name: &str, path: &str) -> Result<Arc<dyn Template>> {
        let provider = self
            .template_providers
            .iter()
            .find(|p| p.name() == engine)
            .ok_or_else(|| SwitchyardError::missing(format!("template engine '{engine}'"), path))?;
        provider.get_template(name)
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = |message: String| SwitchyardError::InvalidHeader {
        name: name.to_string(),
        message,
    };
    Ok((
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?,
        HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{route, route_with, wrapper};
    use crate::inject::NamedInstances;
    use crate::template::TeraTemplateProvider;

    fn registry() -> Switchyard {
        Switchyard::builder()
            .worker_pool(WorkerPool::new(1).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_option_fails_registration() {
        let mut sy = registry();
        let options = Options::new().set("cache", true);
        let err = sy.on_get_with("/x", options, route(|_, _| Ok(()))).err().unwrap();
        assert!(matches!(err, SwitchyardError::UnknownOption { name } if name == "cache"));
        assert!(sy.set_default("cache", true).is_err());
    }

    #[test]
    fn test_missing_collaborators_fail_registration() {
        let mut sy = registry();
        let err = sy
            .on_get_with("/admin", Options::new().roles_allowed(["admin"]), route(|_, _| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, SwitchyardError::MissingCollaborator { .. }));

        let err = sy
            .on_post_with("/tx", Options::new().transactional(true), route(|_, _| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, SwitchyardError::MissingCollaborator { .. }));

        let err = sy
            .on_get_with(
                "/page",
                Options::new().template("page").template_type("freemarker"),
                route(|_, _| Ok(())),
            )
            .err()
            .unwrap();
        assert!(matches!(err, SwitchyardError::MissingCollaborator { .. }));
    }

    #[test]
    fn test_expression_predicate_needs_parser() {
        let mut sy = registry();
        let err = sy.on_get_with("/x", "path == '/x'", route(|_, _| Ok(()))).err().unwrap();
        assert!(matches!(err, SwitchyardError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_default_engine_is_mustache() {
        let mut sy = Switchyard::builder()
            .worker_pool(WorkerPool::new(1).unwrap())
            .settings(Settings {
                template_dir: std::path::PathBuf::from("/nonexistent/switchyard/templates"),
                ..Settings::default()
            })
            .build()
            .unwrap();
        // the engine exists; only the file is missing
        let err = sy
            .on_get_with("/page", Options::new().template("page.html"), route(|_, _| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, SwitchyardError::Template { name, .. } if name == "page.html"));
    }

    #[test]
    fn test_missing_template_fails_registration() {
        let mut sy = Switchyard::builder()
            .worker_pool(WorkerPool::new(1).unwrap())
            .template_provider(TeraTemplateProvider::new())
            .build()
            .unwrap();
        sy.set_default("template_type", "tera").unwrap();
        let err = sy
            .on_get_with("/page", Options::new().template("absent.html"), route(|_, _| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, SwitchyardError::Template { .. }));
    }

    #[test]
    fn test_resolve_applies_post_processors() {
        let names = NamedInstances::default();
        names.register("greeting", "hi".to_string());
        let sy = Switchyard::builder()
            .worker_pool(WorkerPool::new(1).unwrap())
            .provider(names)
            .post_processor(|value| match value.as_str() {
                Some(text) => Injected::new(text.to_uppercase()),
                None => value,
            })
            .build()
            .unwrap();

        assert_eq!(sy.resolve("named:greeting").unwrap().as_str(), Some("HI"));
        assert!(sy.resolve("named:absent").unwrap().is_null());
        assert!(sy.resolve("nobody:greeting").unwrap().is_null());
        assert!(sy.resolve("no-such-alias").unwrap().is_null());
    }

    #[test]
    fn test_chained_registration() {
        let mut sy = registry();
        sy.alias("body", "$entity:string")
            .unwrap()
            .wrapper(wrapper(|ctx, next, _| next.run(ctx)))
            .unwrap()
            .on_get("/a", route(|_, _| Ok("a")))
            .unwrap()
            .on_post("/b", route_with(["body"], |_, _| Ok(())))
            .unwrap();

        let dispatcher = sy.into_dispatcher();
        let paths: Vec<_> = dispatcher.routes().iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
    }
}
