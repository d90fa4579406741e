//! Injection specifiers and their resolvers.
//!
//! A specifier is either a bare alias name or `prefix:suffix`. The reserved
//! prefix `$entity` reads the request body (`string`, `json`, `form`, or raw
//! bytes for any other suffix); every other prefix is answered by the
//! [`InjectionProvider`] registered for it.
//!
//! Specifiers are resolved once, at registration. Anything that cannot be
//! resolved (an unknown alias, an unknown provider) injects null.

mod entity;
mod provider;

pub use entity::{Entity, FormData, FormField, FormValue};
pub use provider::{InjectionProvider, NamedInstances, ProviderFn};

use crate::context::RequestContext;
use crate::error::Result;
use crate::value::Injected;
use entity::EntityKind;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const ENTITY_PREFIX: &str = "$entity";

type ResolveFn = dyn Fn(Option<&RequestContext>) -> Result<Injected> + Send + Sync;

/// Produces the value of one handler parameter for a request.
///
/// The context is absent outside request flow (channel handlers, manual
/// lookups). A null resolver always injects null.
#[derive(Clone, Default)]
pub struct ParamResolver(Option<Arc<ResolveFn>>);

impl ParamResolver {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<&RequestContext>) -> Result<Injected> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn resolve(&self, ctx: Option<&RequestContext>) -> Result<Injected> {
        match &self.0 {
            Some(f) => f(ctx),
            None => Ok(Injected::null()),
        }
    }
}

impl fmt::Debug for ParamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_null() {
            "ParamResolver(null)"
        } else {
            "ParamResolver(..)"
        })
    }
}

/// Adapts every resolved, non-null injected value. Runs in registration order.
pub type PostProcessor = Arc<dyn Fn(Injected) -> Injected + Send + Sync>;

pub(crate) fn post_process(processors: &[PostProcessor], value: Injected) -> Injected {
    processors.iter().fold(value, |value, processor| {
        if value.is_null() {
            value
        } else {
            processor(value)
        }
    })
}

/// The positional parameter list of one handler, fixed at registration.
#[derive(Clone)]
pub struct Injections {
    resolvers: Vec<ParamResolver>,
    post_processors: Arc<[PostProcessor]>,
}

impl Injections {
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolve every parameter for one request, post-processors applied.
    pub fn resolve(&self, ctx: Option<&RequestContext>) -> Result<Vec<Injected>> {
        self.resolvers
            .iter()
            .map(|r| Ok(post_process(&self.post_processors, r.resolve(ctx)?)))
            .collect()
    }
}

/// Owns the alias table, the providers and the post-processors.
pub struct Injector {
    aliases: HashMap<String, ParamResolver>,
    providers: HashMap<String, Arc<dyn InjectionProvider>>,
    post_processors: Arc<[PostProcessor]>,
}

impl Injector {
    pub fn new(
        providers: Vec<Arc<dyn InjectionProvider>>,
        post_processors: Vec<PostProcessor>,
    ) -> Self {
        Self {
            aliases: HashMap::new(),
            providers: providers
                .into_iter()
                .map(|p| (p.prefix().to_string(), p))
                .collect(),
            post_processors: post_processors.into(),
        }
    }

    /// Turn a specifier into a resolver.
    pub fn resolve_spec(&self, specifier: &str) -> ParamResolver {
        let Some((prefix, suffix)) = specifier.split_once(':') else {
            return match self.aliases.get(specifier) {
                Some(resolver) => resolver.clone(),
                None => {
                    tracing::debug!(alias = specifier, "Unknown alias, injecting null");
                    ParamResolver::null()
                }
            };
        };

        if prefix == ENTITY_PREFIX {
            let kind = EntityKind::from_suffix(suffix);
            return ParamResolver::new(move |ctx| match ctx {
                Some(ctx) => kind.read(ctx.entity()),
                None => Ok(Injected::null()),
            });
        }

        match self.providers.get(prefix) {
            Some(provider) => {
                let provider = provider.clone();
                let name = suffix.to_string();
                ParamResolver::new(move |_| Ok(provider.get_object(&name)))
            }
            None => {
                tracing::debug!(prefix, "No injection provider, injecting null");
                ParamResolver::new(|_| Ok(Injected::null()))
            }
        }
    }

    pub fn bind(&self, specifiers: &[String]) -> Injections {
        Injections {
            resolvers: specifiers.iter().map(|s| self.resolve_spec(s)).collect(),
            post_processors: self.post_processors.clone(),
        }
    }

    /// Name a resolver. The specifier is resolved now, against the current table.
    pub fn alias(&mut self, name: impl Into<String>, specifier: &str) {
        let resolver = self.resolve_spec(specifier);
        self.aliases.insert(name.into(), resolver);
    }

    /// Resolve one specifier outside request flow, post-processors applied.
    pub fn resolve_manual(&self, specifier: &str) -> Result<Injected> {
        let value = self.resolve_spec(specifier).resolve(None)?;
        Ok(post_process(&self.post_processors, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use axum::http::Method;
    use bytes::Bytes;

    fn injector() -> Injector {
        let test = ProviderFn::new("test", |name: &str| Injected::new(format!("INJECTED:{name}")));
        Injector::new(vec![Arc::new(test)], Vec::new())
    }

    #[test]
    fn test_provider_prefix() {
        let injector = injector();
        let value = injector.resolve_manual("test:my-injection").unwrap();
        assert_eq!(value.as_str(), Some("INJECTED:my-injection"));
    }

    #[test]
    fn test_unresolvable_injects_null() {
        let injector = injector();
        assert!(injector.resolve_spec("no-such-alias").is_null());
        assert!(injector.resolve_manual("no-such-alias").unwrap().is_null());
        assert!(injector.resolve_manual("cdi:thing").unwrap().is_null());
    }

    #[test]
    fn test_alias_and_idempotence() {
        let mut injector = injector();
        injector.alias("greeting", "test:hello");
        let first = injector.resolve_spec("greeting").resolve(None).unwrap();
        let second = injector.resolve_spec("greeting").resolve(None).unwrap();
        assert_eq!(first.as_str(), Some("INJECTED:hello"));
        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn test_entity_needs_context() {
        let injector = injector();
        let resolver = injector.resolve_spec("$entity:json");
        assert!(resolver.resolve(None).unwrap().is_null());

        let mut ctx = test_context(Method::POST, "/x");
        ctx.set_entity(Entity::new(Bytes::from_static(b"plain"), None));
        let text = injector.resolve_spec("$entity:string").resolve(Some(&ctx)).unwrap();
        assert_eq!(text.as_str(), Some("plain"));
        let raw = injector.resolve_spec("$entity:").resolve(Some(&ctx)).unwrap();
        assert!(raw.is::<Bytes>());
    }

    #[test]
    fn test_post_processors_run_in_order_and_skip_null() {
        let append = |suffix: &'static str| -> PostProcessor {
            Arc::new(move |value: Injected| {
                let text = value.as_str().unwrap_or_default();
                Injected::new(format!("{text}{suffix}"))
            })
        };
        let test = ProviderFn::new("test", |name: &str| {
            if name == "none" {
                Injected::null()
            } else {
                Injected::new(name.to_string())
            }
        });
        let injector = Injector::new(vec![Arc::new(test)], vec![append("-a"), append("-b")]);

        let bound = injector.bind(&["test:x".to_string(), "test:none".to_string()]);
        let values = bound.resolve(None).unwrap();
        assert_eq!(values[0].as_str(), Some("x-a-b"));
        assert!(values[1].is_null());
        assert_eq!(
            injector.resolve_manual("test:x").unwrap().as_str(),
            Some("x-a-b")
        );
    }
}
