use crate::common::{BoxedValue, ValueOrFuture};
use crate::context::{BindingFilter, ConfigGetter, ConfigView, Context, ContextView};
use crate::di::{BindingKey, Getter, ResolutionOptions, ResolutionSession};
use crate::error::{ContextError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Types a [`Context`] can construct for `Binding::to_class`.
///
/// `dependencies` lists what to resolve, in order; `construct` receives the
/// resolved values in the same order. Usually derived:
///
/// ```
/// use meshestra_context::prelude::*;
///
/// #[derive(Injectable)]
/// struct Greeter {
///     #[inject("prefix")]
///     prefix: Arc<String>,
///     #[config("lang")]
///     lang: Option<String>,
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    fn dependencies() -> Vec<Injection> {
        Vec::new()
    }

    fn construct(args: InjectedArgs) -> anyhow::Result<Self>;
}

/// An injectable object whose `value` is what the binding resolves to.
///
/// A fresh provider is constructed for each resolution that is not served
/// from a cache.
pub trait Provider: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn value(&self) -> ValueOrFuture<Self::Value>;
}

/// One dependency of an [`Injectable`].
#[derive(Clone)]
pub enum Injection {
    /// The value bound to `key`.
    Key { key: BindingKey, optional: bool },
    /// A [`Getter`] that resolves `key` when asked.
    Getter { key: BindingKey },
    /// An open [`ContextView`] of the bindings matching `filter`.
    View { filter: BindingFilter },
    /// Configuration of the binding being resolved.
    Config { path: Option<String>, optional: bool },
    /// A [`ConfigGetter`] for the binding being resolved.
    ConfigGetter { path: Option<String>, optional: bool },
    /// A [`ConfigView`] over the configuration of the binding being resolved.
    ConfigView { path: Option<String> },
}

fn non_empty(path: &str) -> Option<String> {
    (!path.is_empty()).then(|| path.to_string())
}

impl Injection {
    pub fn key(key: impl Into<BindingKey>) -> Self {
        Self::Key {
            key: key.into(),
            optional: false,
        }
    }

    pub fn optional(key: impl Into<BindingKey>) -> Self {
        Self::Key {
            key: key.into(),
            optional: true,
        }
    }

    pub fn getter(key: impl Into<BindingKey>) -> Self {
        Self::Getter { key: key.into() }
    }

    pub fn view<F>(filter: F) -> Self
    where
        F: Fn(&crate::di::Binding) -> bool + Send + Sync + 'static,
    {
        Self::View {
            filter: Arc::new(filter),
        }
    }

    /// Configuration at `path`; an empty path selects the whole value.
    /// Missing configuration injects `None`.
    pub fn config(path: &str) -> Self {
        Self::Config {
            path: non_empty(path),
            optional: true,
        }
    }

    /// Like [`Injection::config`] but fails when the configuration is missing.
    pub fn required_config(path: &str) -> Self {
        Self::Config {
            path: non_empty(path),
            optional: false,
        }
    }

    pub fn config_getter(path: &str) -> Self {
        Self::ConfigGetter {
            path: non_empty(path),
            optional: true,
        }
    }

    pub fn config_view(path: &str) -> Self {
        Self::ConfigView {
            path: non_empty(path),
        }
    }

    pub(crate) fn resolve(
        &self,
        context: &Context,
        session: &ResolutionSession,
    ) -> ValueOrFuture<Option<BoxedValue>> {
        match self {
            Self::Key { key, optional } => {
                let options = ResolutionOptions::default()
                    .with_optional(*optional)
                    .with_session(session.fork());
                context.get_value_or_future(key, options)
            }
            Self::Getter { key } => {
                let getter = Getter::new(context.clone(), key.clone(), session.fork());
                ValueOrFuture::ready(Some(Arc::new(getter) as BoxedValue))
            }
            Self::View { filter } => {
                let view = ContextView::new(context, filter.clone());
                view.open();
                ValueOrFuture::ready(Some(Arc::new(view) as BoxedValue))
            }
            Self::Config { path, optional } => {
                let Some(binding) = session.current_binding() else {
                    return ValueOrFuture::ready(None);
                };
                let options = ResolutionOptions::default()
                    .with_optional(*optional)
                    .with_session(session.fork());
                context.get_config_as_value_or_future(binding.key(), path.as_deref(), Some(options))
            }
            Self::ConfigGetter { path, optional } => {
                let Some(binding) = session.current_binding() else {
                    return ValueOrFuture::ready(None);
                };
                let getter = ConfigGetter::new(
                    context.clone(),
                    binding.key(),
                    path.clone(),
                    session.fork(),
                    *optional,
                );
                ValueOrFuture::ready(Some(Arc::new(getter) as BoxedValue))
            }
            Self::ConfigView { path } => {
                let Some(binding) = session.current_binding() else {
                    return ValueOrFuture::ready(None);
                };
                let view = ConfigView::new(context, binding.key(), path.clone());
                view.open();
                ValueOrFuture::ready(Some(Arc::new(view) as BoxedValue))
            }
        }
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { key, optional } => {
                write!(f, "Key({key}{})", if *optional { ", optional" } else { "" })
            }
            Self::Getter { key } => write!(f, "Getter({key})"),
            Self::View { .. } => f.write_str("View"),
            Self::Config { path, .. } => write!(f, "Config({})", path.as_deref().unwrap_or("")),
            Self::ConfigGetter { path, .. } => {
                write!(f, "ConfigGetter({})", path.as_deref().unwrap_or(""))
            }
            Self::ConfigView { path } => write!(f, "ConfigView({})", path.as_deref().unwrap_or("")),
        }
    }
}

/// Resolved dependencies handed to [`Injectable::construct`], in declaration order.
pub struct InjectedArgs {
    key: String,
    values: Vec<Option<BoxedValue>>,
}

impl InjectedArgs {
    pub fn new(key: impl Into<String>, values: Vec<Option<BoxedValue>>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }

    /// Key of the binding being constructed.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&mut self, index: usize) -> Option<BoxedValue> {
        self.values.get_mut(index).and_then(Option::take)
    }

    fn arg_name(&self, index: usize) -> String {
        format!("{}[{}]", self.key, index)
    }

    pub fn take<T: Send + Sync + 'static>(&mut self, index: usize) -> Result<Arc<T>> {
        self.take_optional(index)?
            .ok_or_else(|| ContextError::binding_not_found(self.arg_name(index), &self.key))
    }

    pub fn take_optional<T: Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Result<Option<Arc<T>>> {
        match self.slot(index) {
            None => Ok(None),
            Some(value) => value
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ContextError::downcast_failed::<T>(self.arg_name(index))),
        }
    }

    /// Takes a configuration value, deserializing it from JSON when it was
    /// not bound as a `T` directly.
    pub fn take_config<T>(&mut self, index: usize) -> Result<Option<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let Some(value) = self.slot(index) else {
            return Ok(None);
        };
        if let Some(typed) = value.downcast_ref::<T>() {
            return Ok(Some(typed.clone()));
        }
        match value.downcast_ref::<Value>() {
            Some(Value::Null) => Ok(None),
            Some(json) => serde_json::from_value(json.clone())
                .map(Some)
                .map_err(|e| ContextError::strategy(self.arg_name(index), e.into())),
            None => Err(ContextError::downcast_failed::<T>(self.arg_name(index))),
        }
    }

    pub fn take_getter(&mut self, index: usize) -> Result<Getter> {
        self.take::<Getter>(index).map(|getter| (*getter).clone())
    }

    pub fn take_view(&mut self, index: usize) -> Result<ContextView> {
        self.take::<ContextView>(index).map(|view| (*view).clone())
    }

    pub fn take_config_getter(&mut self, index: usize) -> Result<ConfigGetter> {
        self.take::<ConfigGetter>(index).map(|getter| (*getter).clone())
    }

    pub fn take_config_view(&mut self, index: usize) -> Result<ConfigView> {
        self.take::<ConfigView>(index).map(|view| (*view).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_downcasts() {
        let mut args = InjectedArgs::new(
            "svc",
            vec![Some(Arc::new(7u32) as BoxedValue), None, Some(Arc::new("x") as BoxedValue)],
        );
        assert_eq!(*args.take::<u32>(0).unwrap(), 7);
        assert!(args.take_optional::<u32>(1).unwrap().is_none());
        assert!(matches!(
            args.take::<u32>(2),
            Err(ContextError::DowncastFailed { ref key, .. }) if key == "svc[2]"
        ));
    }

    #[test]
    fn test_take_config_from_json() {
        #[derive(Clone, serde::Deserialize)]
        struct Rest {
            port: u16,
        }

        let mut args = InjectedArgs::new(
            "server",
            vec![Some(Arc::new(json!({"port": 3000})) as BoxedValue), Some(Arc::new(json!(null)) as BoxedValue)],
        );
        assert_eq!(args.take_config::<Rest>(0).unwrap().unwrap().port, 3000);
        assert!(args.take_config::<Rest>(1).unwrap().is_none());
    }

    #[test]
    fn test_config_injection_path() {
        assert!(matches!(Injection::config(""), Injection::Config { path: None, optional: true }));
        assert_eq!(format!("{:?}", Injection::optional("a#b")), "Key(a#b, optional)");
    }
}
