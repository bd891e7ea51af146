use crate::common::BoxedValue;
use crate::context::Context;
use crate::di::Binding;
use crate::error::{ContextError, Result};
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::Arc;

/// A value cached for a binding, tagged with the binding generation it was
/// computed for.
#[derive(Clone)]
pub(crate) struct CachedValue {
    pub(crate) generation: u64,
    pub(crate) value: BoxedValue,
}

impl CachedValue {
    pub(crate) fn new(generation: u64, value: BoxedValue) -> Self {
        Self { generation, value }
    }

    pub(crate) fn fresh(&self, generation: u64) -> Option<BoxedValue> {
        (self.generation == generation).then(|| self.value.clone())
    }
}

/// Cache for `Request`-scoped bindings.
///
/// Clones share the same cache. Hand one to several top-level resolutions via
/// [`ResolutionOptions::with_request_scope`] to make them share instances.
#[derive(Clone, Default)]
pub struct RequestScope {
    cache: Arc<DashMap<u64, CachedValue>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub(crate) fn get(&self, binding_id: u64, generation: u64) -> Option<BoxedValue> {
        self.cache.get(&binding_id)?.fresh(generation)
    }

    pub(crate) fn store(&self, binding_id: u64, generation: u64, value: BoxedValue) {
        self.cache
            .insert(binding_id, CachedValue::new(generation, value));
    }
}

/// Bookkeeping for one resolution: the chain of bindings being resolved and
/// the request scope in effect.
///
/// Sessions are plain values. Entering a binding returns a new session, so a
/// getter can keep a fork of the chain it was created in.
#[derive(Clone, Default)]
pub struct ResolutionSession {
    stack: Vec<Binding>,
    request_scope: RequestScope,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_scope(request_scope: RequestScope) -> Self {
        Self {
            stack: Vec::new(),
            request_scope,
        }
    }

    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn current_binding(&self) -> Option<&Binding> {
        self.stack.last()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn request_scope(&self) -> &RequestScope {
        &self.request_scope
    }

    /// The chain of keys, e.g. `a --> b --> c`.
    pub fn binding_path(&self) -> String {
        self.stack
            .iter()
            .map(|b| b.key())
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    pub(crate) fn set_request_scope(&mut self, request_scope: RequestScope) {
        self.request_scope = request_scope;
    }

    /// Pushes `binding` onto a copy of this session.
    pub(crate) fn enter(&self, binding: &Binding, max_depth: usize) -> Result<Self> {
        if self.stack.iter().any(|b| b.key() == binding.key()) {
            let mut path = self.binding_path();
            path.push_str(" --> ");
            path.push_str(binding.key());
            return Err(ContextError::CircularDependency { path });
        }
        if self.stack.len() >= max_depth {
            return Err(ContextError::ResolutionDepthExceeded {
                key: binding.key().to_string(),
                depth: max_depth,
            });
        }

        let mut next = self.clone();
        next.stack.push(binding.clone());
        Ok(next)
    }
}

/// Options accepted by the `*_with` lookup methods.
#[derive(Clone, Default)]
pub struct ResolutionOptions {
    /// Turn a missing binding into `None` instead of an error.
    pub optional: bool,
    /// Continue an existing resolution chain.
    pub session: Option<ResolutionSession>,
    /// Request cache to use; replaces the one carried by `session`.
    pub request_scope: Option<RequestScope>,
}

impl ResolutionOptions {
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_session(mut self, session: ResolutionSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_request_scope(mut self, request_scope: RequestScope) -> Self {
        self.request_scope = Some(request_scope);
        self
    }

    pub(crate) fn into_session(self) -> ResolutionSession {
        let mut session = self.session.unwrap_or_default();
        if let Some(scope) = self.request_scope {
            session.set_request_scope(scope);
        }
        session
    }
}

/// What a dynamic-value factory receives: the resolving context plus the
/// session of the binding being computed.
///
/// Lookups made through it continue the current chain, so factory cycles are
/// reported like any other cycle.
#[derive(Clone)]
pub struct ResolutionContext {
    context: Context,
    binding: Binding,
    session: ResolutionSession,
}

impl ResolutionContext {
    pub(crate) fn new(context: Context, binding: Binding, session: ResolutionSession) -> Self {
        Self {
            context,
            binding,
            session,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn session(&self) -> &ResolutionSession {
        &self.session
    }

    fn options(&self, optional: bool) -> ResolutionOptions {
        ResolutionOptions::default()
            .with_optional(optional)
            .with_session(self.session.fork())
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        self.context
            .get_with::<T>(key, self.options(false))?
            .ok_or_else(|| ContextError::binding_not_found(key, self.context.name()))
    }

    pub fn get_optional<T: Send + Sync + 'static>(&self, key: &str) -> Result<Option<Arc<T>>> {
        self.context.get_with::<T>(key, self.options(true))
    }

    pub async fn get_async<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        self.context
            .get_async_with::<T>(key, self.options(false))
            .await?
            .ok_or_else(|| ContextError::binding_not_found(key, self.context.name()))
    }

    pub async fn get_async_optional<T: Send + Sync + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<Arc<T>>> {
        self.context.get_async_with::<T>(key, self.options(true)).await
    }
}

impl Deref for ResolutionContext {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}
