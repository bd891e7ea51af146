use crate::common::{BoxedValue, ValueOrFuture};
use crate::context::{Context, ContextEvent, ContextEventKind, ContextInner, ContextObserver, downcast};
use crate::di::{Binding, ResolutionOptions, ResolutionSession};
use crate::error::{ContextError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

/// Selects the bindings a view tracks.
pub type BindingFilter = Arc<dyn Fn(&Binding) -> bool + Send + Sync>;

type RefreshListener = Arc<dyn Fn(&ContextEvent) + Send + Sync>;

pub fn filter_by_tag(tag: impl Into<String>) -> BindingFilter {
    let tag = tag.into();
    Arc::new(move |binding| binding.has_tag(&tag))
}

pub fn filter_by_key(key: impl Into<String>) -> BindingFilter {
    let key = key.into();
    Arc::new(move |binding| binding.key() == key)
}

/// Published on [`ContextView::subscribe`] each time the view's cache is
/// invalidated.
#[derive(Debug, Clone)]
pub struct ViewEvent {
    pub kind: ContextEventKind,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewStatus {
    Idle,
    Open,
    Closed,
}

struct ViewState {
    status: ViewStatus,
    cached: Option<Vec<Binding>>,
    subscriptions: Vec<(Weak<ContextInner>, u64)>,
}

struct ViewInner {
    context: Context,
    filter: BindingFilter,
    state: Mutex<ViewState>,
    listeners: Mutex<Vec<RefreshListener>>,
    events: broadcast::Sender<ViewEvent>,
}

impl ViewInner {
    fn lock_state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(subscriptions: Vec<(Weak<ContextInner>, u64)>) {
        for (context, id) in subscriptions {
            if let Some(context) = Context::upgrade(&context) {
                context.unobserve(id);
            }
        }
    }

    fn affects(&self, event: &ContextEvent, cached: &[Binding]) -> bool {
        let key = event.binding.key();
        if (self.filter)(&event.binding) || cached.iter().any(|b| b.key() == key) {
            return true;
        }
        // A removed binding may have been shadowing a matching one further up.
        event.kind == ContextEventKind::Unbound
            && self
                .context
                .get_binding(key)
                .is_some_and(|binding| (self.filter)(&binding))
    }
}

impl ContextObserver for ViewInner {
    fn observe(&self, event: &ContextEvent) {
        let invalidated = {
            let mut state = self.lock_state();
            if state.status != ViewStatus::Open {
                return;
            }
            let affected = match state.cached.as_deref() {
                Some(cached) => self.affects(event, cached),
                None => false,
            };
            if affected {
                state.cached = None;
            }
            affected
        };
        if !invalidated {
            return;
        }

        tracing::debug!(
            "View over {} refreshed by {} of {}",
            self.context.name(),
            event.kind,
            event.binding.key()
        );
        let listeners: Vec<RefreshListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
        let _ = self.events.send(ViewEvent {
            kind: event.kind,
            key: event.binding.key().to_string(),
        });
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(
            &mut self
                .state
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .subscriptions,
        );
        Self::unsubscribe(subscriptions);
    }
}

/// A live, filtered list of the bindings visible from a context.
///
/// An open view caches its binding list and drops the cache when a matching
/// binding is added, removed or changed anywhere in the context chain. Refresh
/// listeners fire once per invalidation: more changes before the next read
/// do not fire again. A closed view keeps serving its last snapshot. A view
/// that was never opened recomputes on every read.
///
/// ```
/// use meshestra_context::Context;
///
/// let ctx = Context::new();
/// let view = ctx.create_view(|b| b.has_tag("plugin"));
/// view.open();
///
/// ctx.bind("plugins.a").unwrap().to(1u32).tag("plugin");
/// assert_eq!(view.bindings().len(), 1);
/// ```
#[derive(Clone)]
pub struct ContextView {
    inner: Arc<ViewInner>,
}

impl ContextView {
    pub fn new(context: &Context, filter: BindingFilter) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                context: context.clone(),
                filter,
                state: Mutex::new(ViewState {
                    status: ViewStatus::Idle,
                    cached: None,
                    subscriptions: Vec::new(),
                }),
                listeners: Mutex::new(Vec::new()),
                events: broadcast::channel(context.settings().event_channel_capacity.max(1)).0,
            }),
        }
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Starts tracking the view's context and all of its ancestors.
    pub fn open(&self) {
        let mut state = self.inner.lock_state();
        if state.status == ViewStatus::Open {
            return;
        }
        state.status = ViewStatus::Open;
        state.cached = None;

        let observer = Arc::downgrade(&self.inner) as Weak<dyn ContextObserver>;
        let mut current = Some(&self.inner.context);
        while let Some(context) = current {
            let id = context.observe(observer.clone());
            state.subscriptions.push((context.downgrade(), id));
            current = context.parent();
        }
    }

    /// Stops tracking. Reads keep returning the last snapshot.
    pub fn close(&self) {
        let subscriptions = {
            let mut state = self.inner.lock_state();
            state.status = ViewStatus::Closed;
            std::mem::take(&mut state.subscriptions)
        };
        ViewInner::unsubscribe(subscriptions);
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock_state().status == ViewStatus::Open
    }

    /// Drops the cached list so the next read recomputes it.
    pub fn refresh(&self) {
        let mut state = self.inner.lock_state();
        if state.status == ViewStatus::Closed {
            tracing::warn!("Refresh ignored: view over {} is closed", self.inner.context.name());
            return;
        }
        state.cached = None;
    }

    pub fn bindings(&self) -> Vec<Binding> {
        let mut state = self.inner.lock_state();
        if state.status == ViewStatus::Idle {
            return self.inner.context.find(|b| (self.inner.filter)(b));
        }
        if let Some(cached) = &state.cached {
            return cached.clone();
        }
        if state.status == ViewStatus::Closed {
            tracing::warn!(
                "View over {} read after close without a snapshot",
                self.inner.context.name()
            );
        }
        let found = self.inner.context.find(|b| (self.inner.filter)(b));
        state.cached = Some(found.clone());
        found
    }

    /// Resolves every binding of the view in order, staying ready when every
    /// value is ready.
    pub fn values_or_future(
        &self,
        session: Option<ResolutionSession>,
    ) -> ValueOrFuture<Vec<BoxedValue>> {
        let session = session.unwrap_or_default();
        let resolved: Vec<_> = self
            .bindings()
            .iter()
            .map(|binding| {
                let options = ResolutionOptions::optional().with_session(session.fork());
                self.inner.context.get_value_or_future(binding.key(), options)
            })
            .collect();
        // A binding removed since the list was computed simply drops out.
        ValueOrFuture::collect(resolved).map(|values| values.into_iter().flatten().collect())
    }

    pub async fn values(&self) -> Result<Vec<BoxedValue>> {
        self.values_or_future(None).await
    }

    pub fn values_sync(&self) -> Result<Vec<BoxedValue>> {
        self.values_or_future(None)
            .into_sync(|| format!("values of view over {}", self.inner.context.name()))
    }

    pub async fn values_as<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let label = format!("values of view over {}", self.inner.context.name());
        self.values()
            .await?
            .into_iter()
            .map(|value| downcast::<T>(&label, value))
            .collect()
    }

    /// The only value of the view, `None` when empty.
    pub async fn single_value(&self) -> Result<Option<BoxedValue>> {
        let mut values = self.values().await?;
        if values.len() > 1 {
            return Err(ContextError::Other(anyhow::anyhow!(
                "The view over {} has more than one value. Use values() to access them.",
                self.inner.context.name()
            )));
        }
        Ok(values.pop())
    }

    pub fn on_refresh<F>(&self, listener: F)
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.inner.events.subscribe()
    }
}
