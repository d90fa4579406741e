use crate::value::Injected;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// An external capability keyed by prefix.
///
/// A specifier `prefix:name` is answered by the provider registered for
/// `prefix`, once per request.
pub trait InjectionProvider: Send + Sync + 'static {
    fn prefix(&self) -> &str;

    /// The object for `name`, or null when there is none.
    fn get_object(&self, name: &str) -> Injected;
}

/// Provider backed by a closure.
pub struct ProviderFn<F> {
    prefix: String,
    lookup: F,
}

impl<F> ProviderFn<F>
where
    F: Fn(&str) -> Injected + Send + Sync + 'static,
{
    pub fn new(prefix: impl Into<String>, lookup: F) -> Self {
        Self {
            prefix: prefix.into(),
            lookup,
        }
    }
}

impl<F> InjectionProvider for ProviderFn<F>
where
    F: Fn(&str) -> Injected + Send + Sync + 'static,
{
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_object(&self, name: &str) -> Injected {
        (self.lookup)(name)
    }
}

/// Thread-safe registry of named instances.
///
/// ```rust,ignore
/// let instances = NamedInstances::new("named");
/// instances.register("greeting", "hello".to_string());
/// // `named:greeting` now injects the string
/// ```
#[derive(Clone)]
pub struct NamedInstances {
    prefix: String,
    instances: Arc<DashMap<String, Injected>>,
}

impl NamedInstances {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            instances: Arc::new(DashMap::new()),
        }
    }

    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, instance: T) -> &Self {
        self.instances.insert(name.into(), Injected::new(instance));
        self
    }

    /// Register an already shared instance; the same `Arc` is handed out.
    pub fn register_arc<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        instance: Arc<T>,
    ) -> &Self {
        self.instances
            .insert(name.into(), Injected::from_arc(instance));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.instances.get(name)?.get::<T>()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.instances.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for NamedInstances {
    fn default() -> Self {
        Self::new("named")
    }
}

impl InjectionProvider for NamedInstances {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_object(&self, name: &str) -> Injected {
        self.instances
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}
