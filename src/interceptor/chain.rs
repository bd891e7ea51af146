use crate::common::ValueOrFuture;
use crate::context::{Context, ContextView, downcast, filter_by_tag};
use crate::di::ResolutionOptions;
use crate::error::ContextError;
use crate::interceptor::{
    GLOBAL_INTERCEPTOR_TAG, Interceptable, Interceptor, InterceptorOrKey, InvocationArgs,
    InvocationContext, InvocationResult, merge_interceptors,
};
use std::sync::Arc;

/// The end of a chain: receives the final arguments.
pub type TargetCall = Arc<dyn Fn(InvocationArgs) -> InvocationResult + Send + Sync>;

struct InterceptorChain {
    invocation: InvocationContext,
    interceptors: Vec<InterceptorOrKey>,
    target: TargetCall,
}

/// Continuation handed to each interceptor.
#[derive(Clone)]
pub struct Next {
    chain: Arc<InterceptorChain>,
    cursor: usize,
}

impl Next {
    /// Runs the rest of the chain, ending with the target method.
    pub fn proceed(self) -> InvocationResult {
        let chain = self.chain;
        let Some(entry) = chain.interceptors.get(self.cursor).cloned() else {
            tracing::debug!("Invoking target {}", chain.invocation.description());
            return (chain.target)(chain.invocation.args());
        };

        let invocation = chain.invocation.clone();
        let next = Next {
            chain,
            cursor: self.cursor + 1,
        };
        match entry {
            InterceptorOrKey::Interceptor(interceptor) => interceptor.intercept(invocation, next),
            InterceptorOrKey::Key(key) => {
                let value = invocation
                    .context()
                    .get_value_or_future(key.as_str(), ResolutionOptions::default());
                value.and_then(move |value| {
                    let resolved = value
                        .ok_or_else(|| {
                            ContextError::binding_not_found(key.clone(), invocation.context().name())
                        })
                        .and_then(|value| downcast::<Arc<dyn Interceptor>>(&key, value));
                    match resolved {
                        Ok(interceptor) => interceptor.intercept(invocation, next),
                        Err(error) => ValueOrFuture::failed(error),
                    }
                })
            }
        }
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.chain.invocation
    }

    /// Interceptors left before the target, this one excluded.
    pub fn remaining(&self) -> usize {
        self.chain.interceptors.len().saturating_sub(self.cursor)
    }
}

/// Runs `interceptors` in order around `target`.
pub fn invoke_interceptors(
    invocation: InvocationContext,
    interceptors: Vec<InterceptorOrKey>,
    target: TargetCall,
) -> InvocationResult {
    let next = Next {
        chain: Arc::new(InterceptorChain {
            invocation,
            interceptors,
            target,
        }),
        cursor: 0,
    };
    next.proceed()
}

fn global_interceptors(view: &ContextView) -> Vec<InterceptorOrKey> {
    view.bindings()
        .iter()
        .map(|binding| InterceptorOrKey::Key(binding.key().to_string()))
        .collect()
}

fn invoke_with_globals<T: Interceptable>(
    context: &Context,
    globals: Vec<InterceptorOrKey>,
    target: Arc<T>,
    method: &str,
    args: InvocationArgs,
) -> InvocationResult {
    let descriptor = T::descriptor();
    let (Some(method_descriptor), Some(local)) =
        (descriptor.method(method), descriptor.interceptors_for(method))
    else {
        return ValueOrFuture::failed(ContextError::MethodNotFound {
            target: descriptor.name().to_string(),
            method: method.to_string(),
        });
    };
    let interceptors = merge_interceptors(&globals, &local);

    let invocation = InvocationContext::new(
        context,
        target.clone(),
        descriptor.name(),
        method,
        args,
    );
    tracing::debug!(
        "Intercepting {} with {} interceptor(s)",
        invocation.description(),
        interceptors.len()
    );

    let handler = method_descriptor.handler();
    let call: TargetCall = Arc::new(move |args: InvocationArgs| handler(target.clone(), args));
    invoke_interceptors(invocation, interceptors, call)
}

/// Invokes `method` on `target` through its global, class and method
/// interceptors.
///
/// Global interceptors are looked up in `context` on every call.
pub fn invoke_method_with_interceptors<T: Interceptable>(
    context: &Context,
    target: Arc<T>,
    method: &str,
    args: InvocationArgs,
) -> InvocationResult {
    let globals = ContextView::new(context, filter_by_tag(GLOBAL_INTERCEPTOR_TAG));
    invoke_with_globals(context, global_interceptors(&globals), target, method, args)
}

/// Invokes methods through interceptor chains, tracking the global
/// interceptors of one context with a live view.
#[derive(Clone)]
pub struct InterceptionEngine {
    context: Context,
    globals: ContextView,
}

impl InterceptionEngine {
    pub fn new(context: &Context) -> Self {
        let globals = ContextView::new(context, filter_by_tag(GLOBAL_INTERCEPTOR_TAG));
        globals.open();
        Self {
            context: context.clone(),
            globals,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn global_interceptors(&self) -> Vec<InterceptorOrKey> {
        global_interceptors(&self.globals)
    }

    pub fn invoke<T: Interceptable>(
        &self,
        target: Arc<T>,
        method: &str,
        args: InvocationArgs,
    ) -> InvocationResult {
        invoke_with_globals(&self.context, self.global_interceptors(), target, method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{InjectedArgs, Injectable, Injection, Provider};
    use crate::interceptor::{TargetDescriptor, async_interceptor_fn, interceptor_fn};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{LazyLock, Mutex};

    type Events = Arc<Mutex<Vec<String>>>;

    struct Greeter;

    fn name(args: &InvocationArgs) -> String {
        args.first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn hello(args: &InvocationArgs) -> anyhow::Result<Value> {
        Ok(json!(format!("Hello, {}", name(args))))
    }

    fn fail(args: &InvocationArgs) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("error: {}", name(args)))
    }

    static GREETER: LazyLock<TargetDescriptor<Greeter>> = LazyLock::new(|| {
        TargetDescriptor::builder("Greeter")
            .intercept_class(["log"])
            .async_method("greet", |_, args| async move { hello(&args) })
            .intercept("greet", ["convertName", "log"])
            .method("greetSync", |_: &Greeter, args| hello(&args))
            .intercept("greetSync", ["logSync"])
            .async_method("hello", |_, args| async move { hello(&args) })
            .async_method("validated", |_, args| async move { hello(&args) })
            .intercept("validated", ["name-validator"])
            .async_method("fail", |_, args| async move { fail(&args) })
            .intercept("fail", ["logError"])
            .build()
            .expect("valid descriptor")
    });

    impl Interceptable for Greeter {
        fn descriptor() -> &'static TargetDescriptor<Self> {
            &GREETER
        }
    }

    fn push(events: &Events, entry: String) {
        events.lock().unwrap().push(entry);
    }

    fn recorder(events: &Events, label: &'static str) -> Arc<dyn Interceptor> {
        let events = events.clone();
        async_interceptor_fn(move |invocation, next| {
            let events = events.clone();
            async move {
                push(&events, format!("{label}: before-{}", invocation.method_name()));
                let result = next.proceed().await;
                push(&events, format!("{label}: after-{}", invocation.method_name()));
                result
            }
        })
    }

    fn setup() -> (Context, Events) {
        let ctx = Context::named("app");
        let events: Events = Arc::default();
        ctx.bind("log").unwrap().to(recorder(&events, "log"));

        let sync_events = events.clone();
        ctx.bind("logSync")
            .unwrap()
            .to(interceptor_fn(move |invocation, next| {
                push(&sync_events, format!("logSync: before-{}", invocation.method_name()));
                let result = next.proceed();
                push(&sync_events, format!("logSync: after-{}", invocation.method_name()));
                result
            }));

        let converting = events.clone();
        ctx.bind("convertName")
            .unwrap()
            .to(async_interceptor_fn(move |invocation, next| {
                let events = converting.clone();
                async move {
                    push(&events, format!("convertName: before-{}", invocation.method_name()));
                    let upper = name(&invocation.args()).to_uppercase();
                    invocation.set_arg(0, upper);
                    let result = next.proceed().await;
                    push(&events, format!("convertName: after-{}", invocation.method_name()));
                    result
                }
            }));

        let erroring = events.clone();
        ctx.bind("logError")
            .unwrap()
            .to(async_interceptor_fn(move |invocation, next| {
                let events = erroring.clone();
                async move {
                    push(&events, format!("logError: before-{}", invocation.method_name()));
                    match next.proceed().await {
                        Ok(value) => {
                            push(&events, format!("logError: after-{}", invocation.method_name()));
                            Ok(value)
                        }
                        Err(error) => {
                            push(&events, format!("logError: error-{}", invocation.method_name()));
                            Err(error)
                        }
                    }
                }
            }));
        (ctx, events)
    }

    fn recorded(events: &Events) -> Vec<String> {
        events.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_global_class_and_method_order() {
        let (ctx, events) = setup();
        ctx.bind("globalLog")
            .unwrap()
            .to(recorder(&events, "globalLog"))
            .as_global_interceptor();

        let msg = invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "greet", vec![json!("John")])
            .await
            .unwrap();
        assert_eq!(msg, json!("Hello, JOHN"));
        assert_eq!(
            recorded(&events),
            vec![
                "globalLog: before-greet",
                "convertName: before-greet",
                "log: before-greet",
                "log: after-greet",
                "convertName: after-greet",
                "globalLog: after-greet",
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_interceptor_inside_async() {
        let (ctx, events) = setup();
        let msg =
            invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "greetSync", vec![json!("John")])
                .await
                .unwrap();
        assert_eq!(msg, json!("Hello, John"));
        assert_eq!(
            recorded(&events),
            vec![
                "log: before-greetSync",
                "logSync: before-greetSync",
                "logSync: after-greetSync",
                "log: after-greetSync",
            ]
        );
    }

    #[test]
    fn test_sync_chain_stays_ready() {
        let ctx = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = calls.clone();
        let count = interceptor_fn(move |_, next| {
            counting.fetch_add(1, Ordering::SeqCst);
            next.proceed()
        });
        let invocation = InvocationContext::new(&ctx, Arc::new(Greeter), "Greeter", "greet", vec![]);
        let target: TargetCall = Arc::new(|_: InvocationArgs| ValueOrFuture::ready(json!(1)));

        let result = invoke_interceptors(
            invocation,
            vec![InterceptorOrKey::from(&count), InterceptorOrKey::from(&count)],
            target,
        );
        assert!(!result.is_pending());
        assert_eq!(result.into_sync(|| "greet".to_string()).unwrap(), json!(1));
        // The same interceptor listed twice still runs twice when not merged.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_target() {
        let ctx = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = calls.clone();
        let target: TargetCall = Arc::new(move |_: InvocationArgs| {
            counting.fetch_add(1, Ordering::SeqCst);
            ValueOrFuture::ready(json!("fresh"))
        });
        let cache = interceptor_fn(|_, next| {
            assert_eq!(next.remaining(), 0);
            ValueOrFuture::ready(json!("cached"))
        });
        let invocation = InvocationContext::new(&ctx, Arc::new(Greeter), "Greeter", "greet", vec![]);

        let result = invoke_interceptors(invocation, vec![cache.into()], target).await.unwrap();
        assert_eq!(result, json!("cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_flows_back_through_chain() {
        let (ctx, events) = setup();
        let err = invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "fail", vec![json!("John")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "error: John");
        assert_eq!(
            recorded(&events),
            vec![
                "log: before-fail",
                "logError: before-fail",
                "logError: error-fail",
                "log: after-fail",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_interceptor_binding() {
        let ctx = Context::named("empty");
        let err = invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "hello", vec![json!("John")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_binding_is_not_an_interceptor() {
        let ctx = Context::new();
        ctx.bind("log").unwrap().to(42u32);
        let err = invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "hello", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::DowncastFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let ctx = Context::new();
        let err = invoke_method_with_interceptors(&ctx, Arc::new(Greeter), "wave", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Method wave not found on Greeter");
    }

    struct NameValidator {
        valid_names: Arc<Vec<String>>,
    }

    impl Injectable for NameValidator {
        fn dependencies() -> Vec<Injection> {
            vec![Injection::key("valid-names")]
        }

        fn construct(mut args: InjectedArgs) -> anyhow::Result<Self> {
            Ok(Self {
                valid_names: args.take::<Vec<String>>(0)?,
            })
        }
    }

    impl Provider for NameValidator {
        type Value = Arc<dyn Interceptor>;

        fn value(&self) -> ValueOrFuture<Self::Value> {
            let valid_names = self.valid_names.clone();
            ValueOrFuture::ready(interceptor_fn(move |invocation, next| {
                let name = name(&invocation.args());
                if !valid_names.contains(&name) {
                    return ValueOrFuture::failed(ContextError::Other(anyhow::anyhow!(
                        "Name '{name}' is not on the list"
                    )));
                }
                next.proceed()
            }))
        }
    }

    #[tokio::test]
    async fn test_interceptor_from_provider() {
        let ctx = Context::new();
        ctx.bind("valid-names")
            .unwrap()
            .to(vec!["John".to_string(), "Mary".to_string()]);
        ctx.bind("name-validator").unwrap().to_provider::<NameValidator>();
        ctx.bind("log").unwrap().to(interceptor_fn(|_, next| next.proceed()));

        let greeter = Arc::new(Greeter);
        let msg = invoke_method_with_interceptors(&ctx, greeter.clone(), "validated", vec![json!("John")])
            .await
            .unwrap();
        assert_eq!(msg, json!("Hello, John"));

        let err = invoke_method_with_interceptors(&ctx, greeter, "validated", vec![json!("Smith")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Name 'Smith' is not on the list"));
    }

    #[tokio::test]
    async fn test_engine_sees_new_globals() {
        let (ctx, events) = setup();
        let engine = InterceptionEngine::new(&ctx);
        assert!(engine.global_interceptors().is_empty());

        ctx.bind("globalLog")
            .unwrap()
            .to(recorder(&events, "globalLog"))
            .as_global_interceptor();
        assert_eq!(engine.global_interceptors(), vec![InterceptorOrKey::from("globalLog")]);

        engine
            .invoke(Arc::new(Greeter), "hello", vec![json!("John")])
            .await
            .unwrap();
        assert_eq!(recorded(&events).first().map(String::as_str), Some("globalLog: before-hello"));

        ctx.unbind("globalLog");
        assert!(engine.global_interceptors().is_empty());
    }

    #[tokio::test]
    async fn test_global_from_parent_context() {
        let (ctx, events) = setup();
        ctx.bind("globalLog")
            .unwrap()
            .to(recorder(&events, "globalLog"))
            .as_global_interceptor();
        let request = ctx.child_named("request");

        invoke_method_with_interceptors(&request, Arc::new(Greeter), "hello", vec![json!("John")])
            .await
            .unwrap();
        assert_eq!(
            recorded(&events),
            vec![
                "globalLog: before-hello",
                "log: before-hello",
                "log: after-hello",
                "globalLog: after-hello",
            ]
        );
    }
}
