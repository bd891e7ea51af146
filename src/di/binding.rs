use crate::common::{BoxFuture, BoxedValue, ValueOrFuture};
use crate::context::{Context, ContextEventKind, ContextInner};
use crate::di::injectable::{InjectedArgs, Injectable, Injection, Provider};
use crate::di::resolution::{CachedValue, ResolutionContext, ResolutionOptions, ResolutionSession};
use crate::di::BindingKey;
use crate::error::ContextError;
use crate::interceptor::{GLOBAL_INTERCEPTOR_TAG, Interceptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use strum_macros::{Display, EnumString};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// How long a resolved value is reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum BindingScope {
    /// A new value on every resolution.
    #[default]
    Transient,
    /// One value per resolving context.
    Context,
    /// One value for the binding, computed in the context that owns it.
    Singleton,
    /// One value per request scope.
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BindingType {
    Constant,
    Class,
    Provider,
    DynamicValue,
    Alias,
}

pub type DynamicFactory =
    Arc<dyn Fn(&ResolutionContext) -> anyhow::Result<BoxedValue> + Send + Sync>;
pub type AsyncDynamicFactory =
    Arc<dyn Fn(ResolutionContext) -> BoxFuture<'static, anyhow::Result<BoxedValue>> + Send + Sync>;

type BuildFn = Arc<dyn Fn(InjectedArgs) -> ValueOrFuture<BoxedValue> + Send + Sync>;

/// Factory for class and provider bindings: the injections to resolve and the
/// constructor that consumes them.
#[derive(Clone)]
pub struct InjectedFactory {
    type_name: &'static str,
    dependencies: Arc<[Injection]>,
    build: BuildFn,
}

impl InjectedFactory {
    fn for_class<T: Injectable>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            dependencies: T::dependencies().into(),
            build: Arc::new(|args: InjectedArgs| {
                let key = args.key().to_string();
                match T::construct(args) {
                    Ok(instance) => ValueOrFuture::ready(Arc::new(instance) as BoxedValue),
                    Err(e) => ValueOrFuture::failed(ContextError::strategy(key, e)),
                }
            }),
        }
    }

    fn for_provider<P: Provider + Injectable>() -> Self {
        Self {
            type_name: std::any::type_name::<P>(),
            dependencies: P::dependencies().into(),
            build: Arc::new(|args: InjectedArgs| {
                let key = args.key().to_string();
                match P::construct(args) {
                    Ok(provider) => provider
                        .value()
                        .map(|value| Arc::new(value) as BoxedValue)
                        .map_err(move |e| match e {
                            ContextError::Other(source) => {
                                ContextError::StrategyExecution { key, source }
                            }
                            other => other,
                        }),
                    Err(e) => ValueOrFuture::failed(ContextError::strategy(key, e)),
                }
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn dependencies(&self) -> &[Injection] {
        &self.dependencies
    }

    fn instantiate(
        &self,
        context: &Context,
        session: &ResolutionSession,
        key: &str,
    ) -> ValueOrFuture<BoxedValue> {
        let resolved: Vec<_> = self
            .dependencies
            .iter()
            .map(|injection| injection.resolve(context, session))
            .collect();
        let build = self.build.clone();
        let key = key.to_string();
        ValueOrFuture::collect(resolved).and_then(move |values| build(InjectedArgs::new(key, values)))
    }
}

/// How a binding produces its value.
#[derive(Clone)]
pub enum BindingSource {
    Constant(BoxedValue),
    Class(InjectedFactory),
    Provider(InjectedFactory),
    DynamicValue(DynamicFactory),
    AsyncDynamicValue(AsyncDynamicFactory),
    Alias(BindingKey),
}

impl BindingSource {
    pub fn binding_type(&self) -> BindingType {
        match self {
            Self::Constant(_) => BindingType::Constant,
            Self::Class(_) => BindingType::Class,
            Self::Provider(_) => BindingType::Provider,
            Self::DynamicValue(_) | Self::AsyncDynamicValue(_) => BindingType::DynamicValue,
            Self::Alias(_) => BindingType::Alias,
        }
    }
}

struct BindingState {
    source: Option<BindingSource>,
    scope: BindingScope,
    tags: BTreeMap<String, Value>,
}

struct BindingInner {
    id: u64,
    key: String,
    state: RwLock<BindingState>,
    generation: AtomicU64,
    singleton: Mutex<Option<CachedValue>>,
    owner: Mutex<Weak<ContextInner>>,
}

/// Non-owning reference held by caches outside the owning context.
pub(crate) struct WeakBinding(Weak<BindingInner>);

impl WeakBinding {
    /// Whether the binding still exists and is registered in a context.
    pub(crate) fn is_live(&self) -> bool {
        self.0.upgrade().is_some_and(|inner| {
            inner
                .owner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .strong_count()
                > 0
        })
    }
}

/// A named, resolvable unit inside a [`Context`].
///
/// `Binding` is a cheap handle; clones refer to the same binding. The
/// configuration methods consume and return the handle so they chain:
///
/// ```
/// use meshestra_context::{BindingScope, Context};
///
/// let ctx = Context::new();
/// ctx.bind("app.name")
///     .unwrap()
///     .to("demo".to_string())
///     .in_scope(BindingScope::Singleton)
///     .tag("metadata");
/// ```
///
/// Every change bumps the binding's generation, drops cached values and emits
/// a `Changed` event through the owning context.
#[derive(Clone)]
pub struct Binding {
    inner: Arc<BindingInner>,
}

impl Binding {
    /// Creates a detached binding. Use [`Context::bind`] to register one.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
                key: key.into(),
                state: RwLock::new(BindingState {
                    source: None,
                    scope: BindingScope::default(),
                    tags: BTreeMap::new(),
                }),
                generation: AtomicU64::new(0),
                singleton: Mutex::new(None),
                owner: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Process-unique id. Ids grow with creation order.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn scope(&self) -> BindingScope {
        self.read_state().scope
    }

    pub fn binding_type(&self) -> Option<BindingType> {
        self.read_state().source.as_ref().map(BindingSource::binding_type)
    }

    pub fn source(&self) -> Option<BindingSource> {
        self.read_state().source.clone()
    }

    pub fn tags(&self) -> BTreeMap<String, Value> {
        self.read_state().tags.clone()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.read_state().tags.keys().cloned().collect()
    }

    pub fn tag_value(&self, name: &str) -> Option<Value> {
        self.read_state().tags.get(name).cloned()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.read_state().tags.contains_key(name)
    }

    pub fn to<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.set_source(BindingSource::Constant(Arc::new(value)))
    }

    pub fn to_class<T: Injectable>(self) -> Self {
        self.set_source(BindingSource::Class(InjectedFactory::for_class::<T>()))
    }

    pub fn to_provider<P: Provider + Injectable>(self) -> Self {
        self.set_source(BindingSource::Provider(InjectedFactory::for_provider::<P>()))
    }

    pub fn to_dynamic_value<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolutionContext) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let factory: DynamicFactory =
            Arc::new(move |ctx| factory(ctx).map(|value| Arc::new(value) as BoxedValue));
        self.set_source(BindingSource::DynamicValue(factory))
    }

    pub fn to_dynamic_value_async<T, F, Fut>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ResolutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let factory: AsyncDynamicFactory = Arc::new(move |ctx| {
            let future = factory(ctx);
            Box::pin(async move { future.await.map(|value| Arc::new(value) as BoxedValue) })
        });
        self.set_source(BindingSource::AsyncDynamicValue(factory))
    }

    pub fn to_alias(self, key: impl Into<BindingKey>) -> Self {
        self.set_source(BindingSource::Alias(key.into()))
    }

    /// Binds an interceptor instance so it can be referenced by key.
    pub fn to_interceptor<I: Interceptor>(self, interceptor: I) -> Self {
        self.to(Arc::new(interceptor) as Arc<dyn Interceptor>)
    }

    pub fn in_scope(self, scope: BindingScope) -> Self {
        self.update(|state| state.scope = scope)
    }

    /// Adds a tag whose value is its own name.
    pub fn tag(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let value = Value::String(name.clone());
        self.update(|state| {
            state.tags.insert(name, value);
        })
    }

    pub fn tag_with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        self.update(|state| {
            state.tags.insert(name, value);
        })
    }

    pub fn as_global_interceptor(self) -> Self {
        self.tag(GLOBAL_INTERCEPTOR_TAG)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, BindingState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_source(self, source: BindingSource) -> Self {
        self.update(|state| state.source = Some(source))
    }

    fn update(self, f: impl FnOnce(&mut BindingState)) -> Self {
        {
            let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut state);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
        }
        *self.inner.singleton.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.notify_owner(ContextEventKind::Changed);
        self
    }

    fn notify_owner(&self, kind: ContextEventKind) {
        let owner = self
            .inner
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade();
        if let Some(owner) = owner {
            owner.notify(kind, self.clone());
        }
    }

    pub(crate) fn attach(&self, owner: &Arc<ContextInner>) {
        *self.inner.owner.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(owner);
    }

    pub(crate) fn downgrade(&self) -> WeakBinding {
        WeakBinding(Arc::downgrade(&self.inner))
    }

    pub(crate) fn detach(&self) {
        *self.inner.owner.lock().unwrap_or_else(PoisonError::into_inner) = Weak::new();
        *self.inner.singleton.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached_singleton(&self, generation: u64) -> Option<BoxedValue> {
        self.inner
            .singleton
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()?
            .fresh(generation)
    }

    fn store_singleton(&self, generation: u64, value: BoxedValue) {
        if self.generation() != generation {
            tracing::debug!("Binding {} changed during resolution, not caching", self.key());
            return;
        }
        *self.inner.singleton.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(CachedValue::new(generation, value));
    }

    /// Produces the value of this binding.
    ///
    /// `owner` is the context holding the binding, `requester` the context the
    /// lookup started from. Singletons are computed in `owner`, everything else
    /// in `requester`. A cached value is returned without entering the
    /// session, so only bindings that are actually being built count towards
    /// cycles. `optional` carries on through aliases.
    pub(crate) fn resolve(
        &self,
        owner: &Context,
        requester: &Context,
        session: &ResolutionSession,
        optional: bool,
    ) -> ValueOrFuture<BoxedValue> {
        let (scope, source) = {
            let state = self.read_state();
            (state.scope, state.source.clone())
        };
        let Some(source) = source else {
            return ValueOrFuture::failed(ContextError::StrategyExecution {
                key: self.key().to_string(),
                source: anyhow::anyhow!("No value was configured for binding {}", self.key()),
            });
        };
        let generation = self.generation();

        if let Some(value) = self.cached(scope, requester, session, generation) {
            return ValueOrFuture::ready(value);
        }

        let session = match session.enter(self, requester.settings().max_resolution_depth) {
            Ok(session) => session,
            Err(e) => return ValueOrFuture::failed(e),
        };
        match scope {
            BindingScope::Transient => self.execute(&source, requester, &session, optional),
            BindingScope::Singleton => {
                let binding = self.clone();
                self.execute(&source, owner, &session, optional)
                    .map(move |value| {
                        binding.store_singleton(generation, value.clone());
                        value
                    })
            }
            BindingScope::Context => {
                let binding = self.clone();
                let context = requester.clone();
                self.execute(&source, requester, &session, optional)
                    .map(move |value| {
                        if binding.generation() == generation {
                            context.store_scoped(&binding, generation, value.clone());
                        }
                        value
                    })
            }
            BindingScope::Request => {
                let scope = session.request_scope().clone();
                let binding = self.clone();
                self.execute(&source, requester, &session, optional)
                    .map(move |value| {
                        if binding.generation() == generation {
                            scope.store(binding.id(), generation, value.clone());
                        }
                        value
                    })
            }
        }
    }

    fn cached(
        &self,
        scope: BindingScope,
        requester: &Context,
        session: &ResolutionSession,
        generation: u64,
    ) -> Option<BoxedValue> {
        let value = match scope {
            BindingScope::Transient => None,
            BindingScope::Singleton => self.cached_singleton(generation),
            BindingScope::Context => requester.cached_scoped(self.id(), generation),
            BindingScope::Request => session.request_scope().get(self.id(), generation),
        }?;
        tracing::trace!("{} cache hit for {} in {}", scope, self.key(), requester.name());
        Some(value)
    }

    fn execute(
        &self,
        source: &BindingSource,
        context: &Context,
        session: &ResolutionSession,
        optional: bool,
    ) -> ValueOrFuture<BoxedValue> {
        match source {
            BindingSource::Constant(value) => ValueOrFuture::ready(value.clone()),
            BindingSource::Class(factory) | BindingSource::Provider(factory) => {
                factory.instantiate(context, session, self.key())
            }
            BindingSource::DynamicValue(factory) => {
                let ctx = ResolutionContext::new(context.clone(), self.clone(), session.clone());
                match factory(&ctx) {
                    Ok(value) => ValueOrFuture::ready(value),
                    Err(e) => ValueOrFuture::failed(ContextError::strategy(self.key(), e)),
                }
            }
            BindingSource::AsyncDynamicValue(factory) => {
                let ctx = ResolutionContext::new(context.clone(), self.clone(), session.clone());
                let future = factory(ctx);
                let key = self.key().to_string();
                ValueOrFuture::pending(async move {
                    future.await.map_err(|e| ContextError::strategy(key, e))
                })
            }
            BindingSource::Alias(target) => {
                let options = ResolutionOptions::default()
                    .with_optional(optional)
                    .with_session(session.clone());
                // A path that does not exist in the target aliases to null.
                context
                    .get_value_or_future(target, options)
                    .map(|value| value.unwrap_or_else(|| Arc::new(Value::Null) as BoxedValue))
            }
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("Binding")
            .field("key", &self.inner.key)
            .field("scope", &state.scope)
            .field("type", &state.source.as_ref().map(BindingSource::binding_type))
            .field("tags", &state.tags)
            .finish()
    }
}
