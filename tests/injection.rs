use meshestra_context::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct StoreConfig {
    x: u32,
    y: String,
}

#[derive(Injectable)]
struct Store {
    #[config]
    config: Option<StoreConfig>,
}

#[tokio::test]
async fn test_sibling_configuration_is_isolated() {
    let ctx = Context::named("app");
    ctx.configure("store1").to(json!({"x": 1, "y": "a"}));
    ctx.configure("store2").to(json!({"x": 2, "y": "b"}));
    ctx.bind("store1").unwrap().to_class::<Store>();
    ctx.bind("store2").unwrap().to_class::<Store>();

    let store1 = ctx.get_async::<Store>("store1").await.unwrap();
    let store2 = ctx.get_async::<Store>("store2").await.unwrap();
    assert_eq!(
        store1.config,
        Some(StoreConfig {
            x: 1,
            y: "a".to_string()
        })
    );
    assert_eq!(
        store2.config,
        Some(StoreConfig {
            x: 2,
            y: "b".to_string()
        })
    );
}

#[derive(Injectable)]
struct RestServer {
    #[config("port")]
    port: Option<u16>,
    #[config(path = "host")]
    host: Option<String>,
}

#[tokio::test]
async fn test_config_from_dynamic_source() {
    let ctx = Context::new();
    ctx.configure("servers.rest.server1")
        .to_dynamic_value_async(|_| async { Ok::<_, anyhow::Error>(json!({"port": 3000})) });
    ctx.bind("servers.rest.server1").unwrap().to_class::<RestServer>();

    let server = ctx
        .get_async::<RestServer>("servers.rest.server1")
        .await
        .unwrap();
    assert_eq!(server.port, Some(3000));
    assert_eq!(server.host, None);

    // The configuration is asynchronous, so the server cannot be built synchronously.
    let err = ctx.get::<RestServer>("servers.rest.server1").err().unwrap();
    assert!(matches!(err, ContextError::AsyncValue { .. }));
}

#[tokio::test]
async fn test_config_through_alias() {
    let ctx = Context::new();
    ctx.configure("servers.rest.server1")
        .to_alias(BindingKey::config_for("application", Some("rest")));
    ctx.configure("application")
        .to(json!({"rest": {"port": 3000, "host": "localhost"}}));
    ctx.bind("servers.rest.server1").unwrap().to_class::<RestServer>();

    let server = ctx
        .get_async::<RestServer>("servers.rest.server1")
        .await
        .unwrap();
    assert_eq!(server.port, Some(3000));
    assert_eq!(server.host.as_deref(), Some("localhost"));
}

#[derive(Debug, Clone, Deserialize)]
struct PoolConfig {
    size: u32,
}

#[derive(Injectable)]
struct Pool {
    #[config]
    config: PoolConfig,
}

#[tokio::test]
async fn test_required_config_missing() {
    let ctx = Context::new();
    ctx.bind("db.pool").unwrap().to_class::<Pool>();
    let err = ctx.get_async::<Pool>("db.pool").await.err().unwrap();
    assert_eq!(err.to_string(), "Configuration 'db.pool' cannot be resolved");

    ctx.configure("db.pool").to(json!({"size": 4}));
    let pool = ctx.get_async::<Pool>("db.pool").await.unwrap();
    assert_eq!(pool.config.size, 4);
}

#[derive(Injectable)]
struct Logger {
    #[config(getter)]
    config: ConfigGetter,
}

#[tokio::test]
async fn test_config_getter_sees_updates() {
    let ctx = Context::new();
    ctx.configure("loggers.Logger").to(json!({"level": "INFO"}));
    ctx.bind("loggers.Logger").unwrap().to_class::<Logger>();

    let logger = ctx.get_async::<Logger>("loggers.Logger").await.unwrap();
    let level = logger.config.get::<Value>().await.unwrap().unwrap();
    assert_eq!(*level, json!({"level": "INFO"}));

    ctx.configure("loggers.Logger").to(json!({"level": "DEBUG"}));
    let level = logger.config.get::<Value>().await.unwrap().unwrap();
    assert_eq!(*level, json!({"level": "DEBUG"}));
}

#[derive(Injectable)]
struct ViewLogger {
    #[config(view)]
    config: ConfigView,
}

#[tokio::test]
async fn test_config_view_sees_updates() {
    let ctx = Context::new();
    ctx.configure("loggers.Logger").to(json!({"level": "INFO"}));
    ctx.bind("loggers.Logger").unwrap().to_class::<ViewLogger>();

    let logger = ctx.get_async::<ViewLogger>("loggers.Logger").await.unwrap();
    let level = logger.config.single_value_as::<Value>().await.unwrap();
    assert_eq!(level.as_deref(), Some(&json!({"level": "INFO"})));

    ctx.configure("loggers.Logger").to(json!({"level": "DEBUG"}));
    let level = logger.config.single_value_as::<Value>().await.unwrap();
    assert_eq!(level.as_deref(), Some(&json!({"level": "DEBUG"})));
}

#[derive(Injectable)]
struct Greeter {
    #[inject("greeting.prefix")]
    prefix: Arc<String>,
    #[inject("greeting.suffix")]
    suffix: Option<Arc<String>>,
    #[inject("clock", getter)]
    clock: Getter,
    #[inject(view_tag = "greeting.extension")]
    extensions: ContextView,
    greeted: std::sync::atomic::AtomicUsize,
}

impl Greeter {
    async fn greet(&self, name: &str) -> String {
        self.greeted
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let hour = self.clock.get::<u32>().await.map(|h| *h).unwrap_or(0);
        let suffix = self.suffix.as_deref().map(String::as_str).unwrap_or("");
        format!("{} {name}{suffix} @{hour}", self.prefix)
    }
}

#[tokio::test]
async fn test_derived_injections() {
    let ctx = Context::named("app");
    ctx.bind("greeting.prefix").unwrap().to("Hello".to_string());
    ctx.bind("greeter")
        .unwrap()
        .to_class::<Greeter>()
        .in_scope(BindingScope::Singleton);

    let greeter = ctx.get_async::<Greeter>("greeter").await.unwrap();
    assert!(greeter.suffix.is_none());
    assert_eq!(greeter.greet("John").await, "Hello John @0");

    // The getter resolves lazily, the view stays live.
    ctx.bind("clock").unwrap().to(9u32);
    ctx.bind("ext.emoji")
        .unwrap()
        .to("wave".to_string())
        .tag("greeting.extension");
    assert_eq!(greeter.greet("John").await, "Hello John @9");
    assert_eq!(greeter.extensions.values().await.unwrap().len(), 1);
    assert_eq!(
        greeter.greeted.load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn test_missing_required_injection() {
    let ctx = Context::named("app");
    ctx.bind("greeter").unwrap().to_class::<Greeter>();
    let err = ctx.get_async::<Greeter>("greeter").await.err().unwrap();
    assert!(err.is_not_found());
}

#[derive(Injectable)]
struct Engine {
    #[inject("car.wheels", getter)]
    wheels: Getter,
}

#[derive(Injectable)]
struct Wheels {
    #[inject("car.engine")]
    engine: Arc<Engine>,
}

#[tokio::test]
async fn test_getter_breaks_construction_cycle() {
    let ctx = Context::named("garage");
    ctx.bind("car.engine")
        .unwrap()
        .to_class::<Engine>()
        .in_scope(BindingScope::Singleton);
    ctx.bind("car.wheels").unwrap().to_class::<Wheels>();

    let engine = ctx.get_async::<Engine>("car.engine").await.unwrap();
    let wheels = engine.wheels.get::<Wheels>().await.unwrap();
    assert!(Arc::ptr_eq(&wheels.engine, &engine));
}

#[derive(Injectable)]
struct HourProvider {
    #[inject("clock.offset")]
    offset: Arc<u32>,
}

impl Provider for HourProvider {
    type Value = u32;

    fn value(&self) -> ValueOrFuture<u32> {
        ValueOrFuture::ready(12 + *self.offset)
    }
}

#[derive(Injectable)]
struct UnitService;

#[test]
fn test_provider_and_unit_struct() {
    let ctx = Context::new();
    ctx.bind("clock.offset").unwrap().to(2u32);
    ctx.bind("clock.hour").unwrap().to_provider::<HourProvider>();
    ctx.bind("unit").unwrap().to_class::<UnitService>();

    assert_eq!(*ctx.get::<u32>("clock.hour").unwrap(), 14);
    assert!(ctx.get::<UnitService>("unit").is_ok());
}

#[test]
fn test_config_sync_and_async_error() {
    let ctx = Context::new();
    ctx.configure("foo")
        .to_dynamic_value_async(|_| async { Ok::<_, anyhow::Error>(json!({"bar": 1})) });
    let err = ctx.get_config_sync::<Value>("foo", None).err().unwrap();
    assert_eq!(
        err.to_string(),
        "Cannot get config[] for foo synchronously: the value is a future"
    );
}

#[test]
fn test_required_config_path_message() {
    let ctx = Context::new();
    ctx.configure("servers.rest").to(json!({"port": 80}));
    let options = ResolutionOptions::default();
    let err = ctx
        .get_config_as_value_or_future("servers.rest", Some("host"), Some(options))
        .into_sync(|| "servers.rest#host".to_string())
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "Configuration 'servers.rest#host' cannot be resolved"
    );
}
