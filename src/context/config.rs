use crate::common::path::project;
use crate::common::{BoxedValue, ValueOrFuture};
use crate::context::{Context, ContextEvent, ContextView, downcast, filter_by_key};
use crate::di::{BindingKey, ResolutionOptions, ResolutionSession};
use crate::error::{ContextError, Result};
use serde_json::Value;
use std::sync::Arc;

/// Key at which a custom `Arc<dyn ConfigurationResolver>` can be bound.
pub const CONFIG_RESOLVER_KEY: &str = "$config.resolver";

/// Looks up configuration for a binding key.
pub trait ConfigurationResolver: Send + Sync + 'static {
    /// Resolves the configuration of `key`, narrowed to `path` when given.
    ///
    /// `options` of `None` means optional resolution.
    fn get_config_as_value_or_future(
        &self,
        context: &Context,
        key: &str,
        path: Option<&str>,
        options: Option<ResolutionOptions>,
    ) -> ValueOrFuture<Option<BoxedValue>>;
}

/// Reads configuration from the `<key>:$config` binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfigurationResolver;

impl ConfigurationResolver for DefaultConfigurationResolver {
    fn get_config_as_value_or_future(
        &self,
        context: &Context,
        key: &str,
        path: Option<&str>,
        options: Option<ResolutionOptions>,
    ) -> ValueOrFuture<Option<BoxedValue>> {
        let path = path.filter(|p| !p.is_empty());
        let mut options = options.unwrap_or_else(ResolutionOptions::optional);
        let required = !options.optional;
        options.optional = true;

        let label = match path {
            Some(path) => format!("{key}#{path}"),
            None => key.to_string(),
        };
        tracing::debug!("Resolving configuration {} from {}", label, context.name());

        context
            .get_value_or_future(BindingKey::config_for(key, path), options)
            .and_then(move |value| {
                let value = value.filter(|v| !matches!(v.downcast_ref::<Value>(), Some(Value::Null)));
                match value {
                    None if required => {
                        ValueOrFuture::failed(ContextError::ConfigurationNotResolvable { key: label })
                    }
                    value => ValueOrFuture::ready(value),
                }
            })
    }
}

/// Deferred configuration lookup for one binding.
///
/// Each call re-reads the configuration, so rebinding it takes effect
/// without re-creating the consumer.
#[derive(Clone)]
pub struct ConfigGetter {
    context: Context,
    key: String,
    path: Option<String>,
    session: ResolutionSession,
    optional: bool,
}

impl ConfigGetter {
    pub fn new(
        context: Context,
        key: impl Into<String>,
        path: Option<String>,
        session: ResolutionSession,
        optional: bool,
    ) -> Self {
        Self {
            context,
            key: key.into(),
            path,
            session,
            optional,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn value_or_future(&self) -> ValueOrFuture<Option<BoxedValue>> {
        let options = ResolutionOptions::default()
            .with_optional(self.optional)
            .with_session(self.session.fork());
        self.context
            .get_config_as_value_or_future(&self.key, self.path.as_deref(), Some(options))
    }

    fn label(&self) -> String {
        match &self.path {
            Some(path) => format!("{}#{}", self.key, path),
            None => self.key.clone(),
        }
    }

    pub async fn get<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let label = self.label();
        self.value_or_future()
            .await?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }

    pub fn get_sync<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let label = self.label();
        self.value_or_future()
            .into_sync(|| {
                format!(
                    "config[{}] for {}",
                    self.path.as_deref().unwrap_or(""),
                    self.key
                )
            })?
            .map(|value| downcast::<T>(&label, value))
            .transpose()
    }
}

/// A live view of one binding's configuration.
#[derive(Clone)]
pub struct ConfigView {
    view: ContextView,
    path: Option<String>,
}

impl ConfigView {
    pub fn new(context: &Context, key: &str, path: Option<String>) -> Self {
        let filter = filter_by_key(BindingKey::build_key_for_config(key));
        Self {
            view: ContextView::new(context, filter),
            path,
        }
    }

    pub fn open(&self) {
        self.view.open();
    }

    pub fn close(&self) {
        self.view.close();
    }

    pub fn view(&self) -> &ContextView {
        &self.view
    }

    pub fn on_refresh<F>(&self, listener: F)
    where
        F: Fn(&ContextEvent) + Send + Sync + 'static,
    {
        self.view.on_refresh(listener);
    }

    fn narrow(&self, values: Vec<BoxedValue>) -> Vec<BoxedValue> {
        match &self.path {
            None => values,
            Some(path) => values.iter().filter_map(|value| project(value, path)).collect(),
        }
    }

    pub async fn values(&self) -> Result<Vec<BoxedValue>> {
        Ok(self.narrow(self.view.values().await?))
    }

    pub fn values_sync(&self) -> Result<Vec<BoxedValue>> {
        Ok(self.narrow(self.view.values_sync()?))
    }

    pub async fn single_value(&self) -> Result<Option<BoxedValue>> {
        Ok(self.values().await?.into_iter().next())
    }

    pub async fn single_value_as<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        self.single_value()
            .await?
            .map(|value| downcast::<T>(self.path.as_deref().unwrap_or("config"), value))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::BindingScope;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_config_with_path() {
        let ctx = Context::new();
        ctx.configure("servers.rest").to(json!({"host": "localhost", "port": 3000}));

        let port = ctx.get_config::<Value>("servers.rest", Some("port")).await.unwrap();
        assert_eq!(port.as_deref(), Some(&json!(3000)));
        let all = ctx.get_config::<Value>("servers.rest", None).await.unwrap().unwrap();
        assert_eq!(all["host"], json!("localhost"));
    }

    #[test]
    fn test_missing_config_is_none_by_default() {
        let ctx = Context::new();
        assert!(ctx.get_config_sync::<Value>("nothing", None).unwrap().is_none());
    }

    #[test]
    fn test_required_config_missing() {
        let ctx = Context::new();
        ctx.configure("servers.rest").to(json!({"port": 80}));
        let err = ctx
            .get_config_as_value_or_future(
                "servers.rest",
                Some("host"),
                Some(ResolutionOptions::default()),
            )
            .into_sync(|| "config".into())
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration 'servers.rest#host' cannot be resolved");
    }

    #[test]
    fn test_sync_config_of_async_value() {
        let ctx = Context::new();
        ctx.configure("foo")
            .to_dynamic_value_async(|_| async { Ok(json!({"x": 1})) });
        let err = ctx.get_config_sync::<Value>("foo", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot get config[] for foo synchronously: the value is a future"
        );
    }

    #[test]
    fn test_config_alias_to_other_config() {
        let ctx = Context::new();
        ctx.configure("application").to(json!({"rest": {"port": 80}}));
        ctx.configure("servers.rest").to_alias("application:$config#rest");
        let port = ctx
            .get_config_sync::<Value>("servers.rest", Some("port"))
            .unwrap()
            .unwrap();
        assert_eq!(*port, json!(80));
    }

    #[test]
    fn test_config_alias_to_missing_config() {
        let ctx = Context::new();
        ctx.configure("servers.rest").to_alias("application:$config#rest");
        assert!(ctx.get_config_sync::<Value>("servers.rest", None).unwrap().is_none());

        let err = ctx
            .get_config_as_value_or_future("servers.rest", None, Some(ResolutionOptions::default()))
            .into_sync(|| "servers.rest".to_string())
            .err()
            .unwrap();
        assert!(matches!(err, ContextError::ConfigurationNotResolvable { .. }));
    }

    #[test]
    fn test_dynamic_config_reevaluated() {
        let ctx = Context::new();
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        ctx.configure("clock")
            .to_dynamic_value(move |_| Ok(json!({"tick": c.fetch_add(1, Ordering::SeqCst)})))
            .in_scope(BindingScope::Transient);
        let first = ctx.get_config_sync::<Value>("clock", Some("tick")).unwrap().unwrap();
        let second = ctx.get_config_sync::<Value>("clock", Some("tick")).unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_custom_resolver_binding() {
        struct Fixed;
        impl ConfigurationResolver for Fixed {
            fn get_config_as_value_or_future(
                &self,
                _context: &Context,
                key: &str,
                _path: Option<&str>,
                _options: Option<ResolutionOptions>,
            ) -> ValueOrFuture<Option<BoxedValue>> {
                ValueOrFuture::ready(Some(Arc::new(json!(format!("fixed:{key}"))) as BoxedValue))
            }
        }

        let ctx = Context::new();
        ctx.bind(CONFIG_RESOLVER_KEY)
            .unwrap()
            .to(Arc::new(Fixed) as Arc<dyn ConfigurationResolver>);
        let value = ctx.get_config_sync::<Value>("anything", None).unwrap().unwrap();
        assert_eq!(*value, json!("fixed:anything"));

        let child = ctx.child();
        child.set_config_resolver(Arc::new(DefaultConfigurationResolver));
        assert!(child.get_config_sync::<Value>("anything", None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_config_getter_rereads() {
        let ctx = Context::new();
        ctx.configure("svc").to(json!({"level": "info"}));
        let getter = ConfigGetter::new(
            ctx.clone(),
            "svc",
            Some("level".into()),
            ResolutionSession::new(),
            true,
        );
        assert_eq!(*getter.get::<Value>().await.unwrap().unwrap(), json!("info"));

        ctx.configure("svc").to(json!({"level": "debug"}));
        assert_eq!(*getter.get_sync::<Value>().unwrap().unwrap(), json!("debug"));
    }

    #[tokio::test]
    async fn test_config_view_follows_rebinds() {
        let ctx = Context::new();
        let view = ConfigView::new(&ctx, "svc", Some("level".into()));
        view.open();
        assert!(view.single_value().await.unwrap().is_none());

        ctx.configure("svc").to(json!({"level": "info"}));
        let level = view.single_value_as::<Value>().await.unwrap().unwrap();
        assert_eq!(*level, json!("info"));
    }
}
