use crate::context::Context;
use crate::error::{ContextError, Result};
use crate::interceptor::{Interceptable, InterceptionEngine, InvocationArgs};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Wraps a target so every method call runs through its interceptors.
///
/// Calls are always asynchronous, even for methods declared synchronous.
/// Properties are read straight from the target.
pub struct InterceptionProxy<T: Interceptable> {
    target: Arc<T>,
    engine: InterceptionEngine,
}

impl<T: Interceptable> Clone for InterceptionProxy<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<T: Interceptable> InterceptionProxy<T> {
    pub fn new(target: Arc<T>, context: &Context) -> Self {
        Self {
            target,
            engine: InterceptionEngine::new(context),
        }
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn context(&self) -> &Context {
        self.engine.context()
    }

    pub async fn invoke(&self, method: &str, args: InvocationArgs) -> Result<Value> {
        self.engine.invoke(self.target.clone(), method, args).await
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        T::descriptor().property(&self.target, name)
    }

    /// Looks up a method or property by name.
    pub fn member(&self, name: &str) -> Result<ProxyMember<T>> {
        let descriptor = T::descriptor();
        if descriptor.method(name).is_some() {
            return Ok(ProxyMember::Method(BoundMethod {
                proxy: self.clone(),
                name: name.to_string(),
            }));
        }
        match descriptor.property(&self.target, name) {
            Some(value) => Ok(ProxyMember::Property(value)),
            None => Err(ContextError::MethodNotFound {
                target: descriptor.name().to_string(),
                method: name.to_string(),
            }),
        }
    }
}

impl<T: Interceptable> fmt::Debug for InterceptionProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionProxy")
            .field("target", &T::descriptor().name())
            .field("context", &self.engine.context().name())
            .finish()
    }
}

pub enum ProxyMember<T: Interceptable> {
    Method(BoundMethod<T>),
    Property(Value),
}

/// A proxy method detached from its name lookup.
pub struct BoundMethod<T: Interceptable> {
    proxy: InterceptionProxy<T>,
    name: String,
}

impl<T: Interceptable> BoundMethod<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: InvocationArgs) -> Result<Value> {
        self.proxy.invoke(&self.name, args).await
    }
}

/// Shorthand for [`InterceptionProxy::new`].
pub fn create_proxy_with_interceptors<T: Interceptable>(
    target: Arc<T>,
    context: &Context,
) -> InterceptionProxy<T> {
    InterceptionProxy::new(target, context)
}
