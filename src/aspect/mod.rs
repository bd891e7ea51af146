use crate::common::ValueOrFuture;
use crate::error::{ContextError, Result};
use crate::interceptor::{Interceptor, InvocationContext, InvocationResult, Next};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a hook. An error from `before` stops the invocation.
pub type AspectResult = Result<()>;

/// # Aspect
///
/// Hooks around a single method invocation. `before` sees the arguments and
/// may reject the call, `after` may rewrite the returned value, and `on_error`
/// observes failures. Wrap an aspect in [`AspectInterceptor`] to place it in
/// an interceptor chain; the adapter calls `proceed()` on the aspect's behalf.
///
/// ### Example
///
/// ```rust
/// use meshestra_context::prelude::*;
///
/// pub struct RequireName;
///
/// #[async_trait]
/// impl Aspect for RequireName {
///     async fn before(&self, invocation: &InvocationContext) -> AspectResult {
///         match invocation.arg(0) {
///             Some(serde_json::Value::String(_)) => Ok(()),
///             _ => Err(ContextError::Other(anyhow::anyhow!("name is required"))),
///         }
///     }
/// }
///
/// let ctx = Context::new();
/// ctx.bind("requireName").unwrap().to(AspectInterceptor::new(RequireName).into_interceptor());
/// ```
#[async_trait]
pub trait Aspect: Send + Sync + 'static {
    /// Executed before the rest of the chain. Failing here skips the call.
    async fn before(&self, _invocation: &InvocationContext) -> AspectResult {
        Ok(())
    }

    /// Executed after the call returns successfully. May rewrite the result.
    async fn after(&self, _invocation: &InvocationContext, _result: &mut Value) -> AspectResult {
        Ok(())
    }

    /// Executed when the call or a downstream interceptor fails.
    async fn on_error(&self, _invocation: &InvocationContext, _error: &ContextError) {
        // Default: No-op
    }
}

/// Adapter that wraps an [`Aspect`] to work within the [`Interceptor`] system.
pub struct AspectInterceptor<A: Aspect> {
    aspect: Arc<A>,
}

impl<A: Aspect> AspectInterceptor<A> {
    pub fn new(aspect: A) -> Self {
        Self {
            aspect: Arc::new(aspect),
        }
    }

    /// Erases the aspect type, ready to be bound or declared on a target.
    pub fn into_interceptor(self) -> Arc<dyn Interceptor> {
        Arc::new(self)
    }
}

impl<A: Aspect> Interceptor for AspectInterceptor<A> {
    fn intercept(&self, invocation: InvocationContext, next: Next) -> InvocationResult {
        let aspect = self.aspect.clone();
        ValueOrFuture::pending(async move {
            aspect.before(&invocation).await?;

            match next.proceed().await {
                Ok(mut value) => {
                    aspect.after(&invocation, &mut value).await?;
                    Ok(value)
                }
                Err(e) => {
                    aspect.on_error(&invocation, &e).await;
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::interceptor::{InvocationArgs, TargetCall, invoke_interceptors};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Shout {
        errors: AtomicUsize,
    }

    #[async_trait]
    impl Aspect for Shout {
        async fn before(&self, invocation: &InvocationContext) -> AspectResult {
            if invocation.arg(0).is_none() {
                return Err(ContextError::Other(anyhow::anyhow!("missing name")));
            }
            Ok(())
        }

        async fn after(&self, _invocation: &InvocationContext, result: &mut Value) -> AspectResult {
            if let Some(text) = result.as_str() {
                *result = json!(text.to_uppercase());
            }
            Ok(())
        }

        async fn on_error(&self, _invocation: &InvocationContext, _error: &ContextError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn run(aspect: Arc<dyn Interceptor>, args: InvocationArgs, target: TargetCall) -> InvocationResult {
        let invocation = InvocationContext::new(&Context::new(), Arc::new(()), "Greeter", "greet", args);
        invoke_interceptors(invocation, vec![aspect.into()], target)
    }

    fn greet() -> TargetCall {
        Arc::new(|args: InvocationArgs| {
            let name = args[0].as_str().unwrap_or_default().to_string();
            ValueOrFuture::ready(json!(format!("hello, {name}")))
        })
    }

    #[tokio::test]
    async fn test_before_and_after_hooks() {
        let aspect = AspectInterceptor::new(Shout::default()).into_interceptor();
        let result = run(aspect.clone(), vec![json!("john")], greet()).await.unwrap();
        assert_eq!(result, json!("HELLO, JOHN"));

        let err = run(aspect, vec![], greet()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing name");
    }

    #[tokio::test]
    async fn test_on_error_hook() {
        let interceptor = Arc::new(AspectInterceptor::new(Shout::default()));
        let failing: TargetCall = Arc::new(|_: InvocationArgs| {
            ValueOrFuture::<Value>::failed(ContextError::Other(anyhow::anyhow!("down")))
        });
        let err = run(interceptor.clone(), vec![json!("john")], failing).await.unwrap_err();
        assert_eq!(err.to_string(), "down");
        assert_eq!(interceptor.aspect.errors.load(Ordering::SeqCst), 1);
    }
}
