mod builder;
mod config;
mod events;
mod view;

pub use builder::ContextBuilder;
pub use config::{
    CONFIG_RESOLVER_KEY, ConfigGetter, ConfigView, ConfigurationResolver,
    DefaultConfigurationResolver,
};
pub use events::{ContextEvent, ContextEventKind};
pub use view::{BindingFilter, ContextView, ViewEvent, filter_by_key, filter_by_tag};

pub(crate) use events::ContextObserver;

use crate::common::path::project;
use crate::common::{BoxedValue, ValueOrFuture};
use crate::config::ContextSettings;
use crate::di::{Binding, BindingKey, CachedValue, ResolutionOptions, WeakBinding};
use crate::error::{ContextError, Result};
use crate::interceptor::{Interceptable, InterceptionProxy};
use crate::module::Module;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use events::EventHub;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;

pub(crate) struct ContextInner {
    name: String,
    parent: Option<Context>,
    registry: DashMap<String, Binding>,
    scoped_cache: DashMap<u64, ScopedValue>,
    events: EventHub,
    settings: ContextSettings,
    config_resolver: RwLock<Option<Arc<dyn ConfigurationResolver>>>,
}

struct ScopedValue {
    binding: WeakBinding,
    value: CachedValue,
}

impl ContextInner {
    pub(crate) fn notify(&self, kind: ContextEventKind, binding: Binding) {
        self.events.publish(ContextEvent {
            kind,
            binding,
            context: self.name.clone(),
        });
    }
}

/// A registry of bindings with an optional parent.
///
/// Lookups start in this context and fall back to the parent chain; the
/// nearest binding for a key wins. `Context` is a handle: clones share the
/// same registry, and a child keeps its parent alive but not the other way
/// around.
///
/// ```
/// use meshestra_context::Context;
///
/// let app = Context::named("app");
/// app.bind("greeting").unwrap().to("hello".to_string());
///
/// let request = app.child_named("request");
/// let greeting = request.get::<String>("greeting").unwrap();
/// assert_eq!(greeting.as_str(), "hello");
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        ContextBuilder::new().build()
    }

    pub fn named(name: impl Into<String>) -> Self {
        ContextBuilder::new().name(name).build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn child(&self) -> Self {
        ContextBuilder::new().parent(self).build()
    }

    pub fn child_named(&self, name: impl Into<String>) -> Self {
        ContextBuilder::new().parent(self).name(name).build()
    }

    pub(crate) fn from_parts(
        name: String,
        parent: Option<Context>,
        settings: ContextSettings,
    ) -> Self {
        tracing::debug!("Creating context {}", name);
        Self {
            inner: Arc::new(ContextInner {
                events: EventHub::new(settings.event_channel_capacity),
                name,
                parent,
                registry: DashMap::new(),
                scoped_cache: DashMap::new(),
                settings,
                config_resolver: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.inner.settings
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a new binding. Fails if this context already has `key`.
    pub fn bind(&self, key: impl Into<String>) -> Result<Binding> {
        let binding = match self.inner.registry.entry(key.into()) {
            Entry::Occupied(entry) => {
                return Err(ContextError::DuplicateBinding {
                    key: entry.key().clone(),
                    context: self.name().to_string(),
                });
            }
            Entry::Vacant(entry) => {
                let binding = Binding::new(entry.key().clone());
                binding.attach(&self.inner);
                entry.insert(binding.clone());
                binding
            }
        };
        tracing::debug!("Bound {} in context {}", binding.key(), self.name());
        self.inner.notify(ContextEventKind::Bound, binding.clone());
        Ok(binding)
    }

    /// Registers a binding, replacing any binding this context has for `key`.
    pub fn rebind(&self, key: impl Into<String>) -> Binding {
        let key = key.into();
        let binding = Binding::new(key.clone());
        binding.attach(&self.inner);
        let previous = self.inner.registry.insert(key, binding.clone());
        if let Some(previous) = previous {
            self.release(&previous);
            self.inner.notify(ContextEventKind::Unbound, previous);
        }
        tracing::debug!("Rebound {} in context {}", binding.key(), self.name());
        self.inner.notify(ContextEventKind::Bound, binding.clone());
        binding
    }

    /// Removes this context's own binding for `key`. Parents are untouched.
    pub fn unbind(&self, key: &str) -> bool {
        let Some((_, binding)) = self.inner.registry.remove(key) else {
            return false;
        };
        self.release(&binding);
        tracing::debug!("Unbound {} in context {}", key, self.name());
        self.inner.notify(ContextEventKind::Unbound, binding);
        true
    }

    fn release(&self, binding: &Binding) {
        binding.detach();
        self.inner.scoped_cache.remove(&binding.id());
    }

    /// Whether this context itself has `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.registry.contains_key(key)
    }

    /// Whether `key` is bound here or in an ancestor.
    pub fn is_bound(&self, key: &str) -> bool {
        self.find_binding_with_owner(key).is_some()
    }

    pub fn get_binding(&self, key: &str) -> Option<Binding> {
        self.find_binding_with_owner(key).map(|(binding, _)| binding)
    }

    fn find_binding_with_owner(&self, key: &str) -> Option<(Binding, Context)> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(binding) = ctx.inner.registry.get(key) {
                return Some((binding.clone(), ctx.clone()));
            }
            current = ctx.parent();
        }
        None
    }

    /// This context's own bindings in creation order.
    pub fn bindings(&self) -> Vec<Binding> {
        let mut bindings: Vec<Binding> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        bindings.sort_by_key(Binding::id);
        bindings
    }

    /// Effective bindings matching `filter`: nearest context first, creation
    /// order within a context, and a key shadowed by a nearer context is
    /// never returned.
    pub fn find<F>(&self, filter: F) -> Vec<Binding>
    where
        F: Fn(&Binding) -> bool,
    {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            for binding in ctx.bindings() {
                if seen.insert(binding.key().to_string()) && filter(&binding) {
                    found.push(binding);
                }
            }
            current = ctx.parent();
        }
        found
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<Binding> {
        self.find(|binding| binding.has_tag(tag))
    }

    pub fn create_view<F>(&self, filter: F) -> ContextView
    where
        F: Fn(&Binding) -> bool + Send + Sync + 'static,
    {
        ContextView::new(self, Arc::new(filter))
    }

    /// Receives every mutation of this context's own registry.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn observe(&self, observer: Weak<dyn ContextObserver>) -> u64 {
        self.inner.events.observe(observer)
    }

    pub(crate) fn unobserve(&self, id: u64) {
        self.inner.events.unobserve(id);
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ContextInner>) -> Option<Context> {
        inner.upgrade().map(|inner| Context { inner })
    }

    pub(crate) fn cached_scoped(&self, binding_id: u64, generation: u64) -> Option<BoxedValue> {
        self.inner.scoped_cache.get(&binding_id)?.value.fresh(generation)
    }

    /// Caches a context-scoped value, dropping entries of bindings that were
    /// unbound or rebound since they were stored.
    pub(crate) fn store_scoped(&self, binding: &Binding, generation: u64, value: BoxedValue) {
        let scoped = &self.inner.scoped_cache;
        scoped.retain(|_, entry| entry.binding.is_live());
        scoped.insert(
            binding.id(),
            ScopedValue {
                binding: binding.downgrade(),
                value: CachedValue::new(generation, value),
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn scoped_len(&self) -> usize {
        self.inner.scoped_cache.len()
    }

    /// Resolves `key` without forcing a choice between sync and async.
    ///
    /// The result stays ready when every step of the resolution is ready.
    /// With `options.optional`, a missing binding yields `None`; so does a
    /// `#path` that does not exist in the resolved value.
    pub fn get_value_or_future(
        &self,
        key: impl Into<BindingKey>,
        options: ResolutionOptions,
    ) -> ValueOrFuture<Option<BoxedValue>> {
        let key = key.into();
        let optional = options.optional;
        let session = options.into_session();

        let Some((binding, owner)) = self.find_binding_with_owner(key.key()) else {
            if optional {
                tracing::debug!("Optional binding {} not found in {}", key, self.name());
                return ValueOrFuture::ready(None);
            }
            return ValueOrFuture::failed(ContextError::binding_not_found(
                key.to_string(),
                self.name(),
            ));
        };

        tracing::debug!("Resolving {} from context {}", key, self.name());
        let resolved = binding.resolve(&owner, self, &session, optional);
        match key.path() {
            None => resolved.map(Some),
            Some(path) => {
                let path = path.to_string();
                resolved.map(move |value| project(&value, &path))
            }
        }
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: impl Into<BindingKey>) -> Result<Arc<T>> {
        let key = key.into();
        self.get_with::<T>(&key, ResolutionOptions::default())?
            .ok_or_else(|| ContextError::binding_not_found(key.to_string(), self.name()))
    }

    /// Synchronous lookup. Fails with [`ContextError::AsyncValue`] when any
    /// step of the resolution is asynchronous.
    pub fn get_with<T: Send + Sync + 'static>(
        &self,
        key: impl Into<BindingKey>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into();
        let label = key.to_string();
        self.get_value_or_future(key, options)
            .into_sync(|| label.clone())?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }

    pub async fn get_async<T: Send + Sync + 'static>(
        &self,
        key: impl Into<BindingKey>,
    ) -> Result<Arc<T>> {
        let key = key.into();
        self.get_async_with::<T>(&key, ResolutionOptions::default())
            .await?
            .ok_or_else(|| ContextError::binding_not_found(key.to_string(), self.name()))
    }

    pub async fn get_async_with<T: Send + Sync + 'static>(
        &self,
        key: impl Into<BindingKey>,
        options: ResolutionOptions,
    ) -> Result<Option<Arc<T>>> {
        let key = key.into();
        let label = key.to_string();
        self.get_value_or_future(key, options)
            .await?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }

    /// Binds (or rebinds) the configuration of `key`.
    ///
    /// ```
    /// use meshestra_context::Context;
    /// use serde_json::json;
    ///
    /// let ctx = Context::new();
    /// ctx.configure("servers.rest").to(json!({"port": 3000}));
    /// let port = ctx
    ///     .get_config_sync::<serde_json::Value>("servers.rest", Some("port"))
    ///     .unwrap();
    /// assert_eq!(port.as_deref(), Some(&json!(3000)));
    /// ```
    pub fn configure(&self, key: &str) -> Binding {
        self.rebind(BindingKey::build_key_for_config(key))
            .tag_with("config", key)
    }

    pub fn set_config_resolver(&self, resolver: Arc<dyn ConfigurationResolver>) {
        *self
            .inner
            .config_resolver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(resolver);
    }

    /// The resolver used for configuration lookups: one set on this context
    /// or an ancestor, else one bound at [`CONFIG_RESOLVER_KEY`], else the
    /// default.
    pub fn config_resolver(&self) -> Arc<dyn ConfigurationResolver> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            let explicit = ctx
                .inner
                .config_resolver
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(resolver) = explicit {
                return resolver;
            }
            current = ctx.parent();
        }

        match self.get_with::<Arc<dyn ConfigurationResolver>>(
            CONFIG_RESOLVER_KEY,
            ResolutionOptions::optional(),
        ) {
            Ok(Some(resolver)) => (*resolver).clone(),
            Ok(None) => Arc::new(DefaultConfigurationResolver),
            Err(e) => {
                tracing::warn!("Falling back to the default configuration resolver: {}", e);
                Arc::new(DefaultConfigurationResolver)
            }
        }
    }

    pub fn get_config_as_value_or_future(
        &self,
        key: &str,
        path: Option<&str>,
        options: Option<ResolutionOptions>,
    ) -> ValueOrFuture<Option<BoxedValue>> {
        self.config_resolver()
            .get_config_as_value_or_future(self, key, path, options)
    }

    pub async fn get_config<T: Send + Sync + 'static>(
        &self,
        key: &str,
        path: Option<&str>,
    ) -> Result<Option<Arc<T>>> {
        let label = config_label(key, path);
        self.get_config_as_value_or_future(key, path, None)
            .await?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }

    pub fn get_config_sync<T: Send + Sync + 'static>(
        &self,
        key: &str,
        path: Option<&str>,
    ) -> Result<Option<Arc<T>>> {
        let label = config_label(key, path);
        self.get_config_as_value_or_future(key, path, None)
            .into_sync(|| format!("config[{}] for {}", path.unwrap_or(""), key))?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }

    /// Resolves `key` and wraps the value so its methods run through the
    /// interceptor chain.
    pub async fn get_proxy<T: Interceptable>(
        &self,
        key: impl Into<BindingKey>,
    ) -> Result<InterceptionProxy<T>> {
        let target = self.get_async::<T>(key).await?;
        Ok(InterceptionProxy::new(target, self))
    }

    pub fn mount<M: Module>(&self) -> Result<()> {
        tracing::debug!(
            "Mounting module {} into {}",
            std::any::type_name::<M>(),
            self.name()
        );
        M::register(self)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("parent", &self.parent().map(Context::name))
            .field("bindings", &self.inner.registry.len())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

fn config_label(key: &str, path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!("{key}#{path}"),
        _ => key.to_string(),
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(key: &str, value: BoxedValue) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContextError::downcast_failed::<T>(key))
}
