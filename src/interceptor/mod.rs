//! Method interception.
//!
//! An intercepted call runs through an ordered chain: global interceptors
//! (bindings tagged [`GLOBAL_INTERCEPTOR_TAG`]), then class-level, then
//! method-level ones, each list merged so that an interceptor runs once. Every
//! interceptor receives the [`InvocationContext`] and a [`Next`] handle; the
//! end of the chain is the target method itself.
//!
//! Interceptors return [`InvocationResult`], which is either ready or pending,
//! so synchronous and asynchronous interceptors mix freely and a fully
//! synchronous chain never allocates a future.

mod chain;
mod descriptor;
mod invocation;
mod logging;
mod proxy;

pub use chain::{
    InterceptionEngine, Next, TargetCall, invoke_interceptors, invoke_method_with_interceptors,
};
pub use descriptor::{Interceptable, MethodDescriptor, TargetDescriptor, TargetDescriptorBuilder};
pub use invocation::InvocationContext;
pub use logging::LoggingInterceptor;
pub use proxy::{BoundMethod, InterceptionProxy, ProxyMember, create_proxy_with_interceptors};

use crate::common::ValueOrFuture;
use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Tag marking a binding as an interceptor for every intercepted call.
pub const GLOBAL_INTERCEPTOR_TAG: &str = "global-interceptor";

pub type InvocationArgs = Vec<Value>;
pub type InvocationResult = ValueOrFuture<Value>;

/// Wraps a method invocation.
///
/// Call `next.proceed()` to continue the chain, or return without calling it
/// to short-circuit.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, invocation: InvocationContext, next: Next) -> InvocationResult;
}

impl<F> Interceptor for F
where
    F: Fn(InvocationContext, Next) -> InvocationResult + Send + Sync + 'static,
{
    fn intercept(&self, invocation: InvocationContext, next: Next) -> InvocationResult {
        self(invocation, next)
    }
}

/// Turns a closure into a shareable interceptor.
pub fn interceptor_fn<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(InvocationContext, Next) -> InvocationResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Turns an async closure into a shareable interceptor.
///
/// ```
/// use meshestra_context::interceptor::async_interceptor_fn;
///
/// let timing = async_interceptor_fn(|invocation, next| async move {
///     tracing::info!("before {}", invocation.method_name());
///     let result = next.proceed().await;
///     tracing::info!("after {}", invocation.method_name());
///     result
/// });
/// ```
pub fn async_interceptor_fn<F, Fut>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(InvocationContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |invocation: InvocationContext, next: Next| {
        ValueOrFuture::pending(f(invocation, next))
    })
}

/// An interceptor, or the key of a binding that resolves to one.
///
/// Keys compare by name, direct interceptors by identity.
#[derive(Clone)]
pub enum InterceptorOrKey {
    Key(String),
    Interceptor(Arc<dyn Interceptor>),
}

impl PartialEq for InterceptorOrKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Key(a), Self::Key(b)) => a == b,
            (Self::Interceptor(a), Self::Interceptor(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl Eq for InterceptorOrKey {}

impl fmt::Debug for InterceptorOrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "Key({key})"),
            Self::Interceptor(interceptor) => {
                write!(f, "Interceptor({:p})", Arc::as_ptr(interceptor))
            }
        }
    }
}

impl From<&str> for InterceptorOrKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for InterceptorOrKey {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<Arc<dyn Interceptor>> for InterceptorOrKey {
    fn from(interceptor: Arc<dyn Interceptor>) -> Self {
        Self::Interceptor(interceptor)
    }
}

impl From<&Arc<dyn Interceptor>> for InterceptorOrKey {
    fn from(interceptor: &Arc<dyn Interceptor>) -> Self {
        Self::Interceptor(interceptor.clone())
    }
}

/// Puts `front` ahead of `back`, dropping from `front` whatever `back`
/// already has.
///
/// - `[log] + [cache, log] => [cache, log]`
/// - `[log] + [log, cache] => [log, cache]`
/// - `[log] + [cache] => [log, cache]`
pub fn merge_interceptors(
    front: &[InterceptorOrKey],
    back: &[InterceptorOrKey],
) -> Vec<InterceptorOrKey> {
    let mut merged: Vec<InterceptorOrKey> = Vec::with_capacity(front.len() + back.len());
    for interceptor in front {
        if !back.contains(interceptor) && !merged.contains(interceptor) {
            merged.push(interceptor.clone());
        }
    }
    for interceptor in back {
        if !merged.contains(interceptor) {
            merged.push(interceptor.clone());
        }
    }
    merged
}
