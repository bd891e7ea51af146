use crate::common::ValueOrFuture;
use crate::error::{ContextError, Result};
use crate::interceptor::{InterceptorOrKey, InvocationArgs, InvocationResult, merge_interceptors};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub type MethodHandler<T> = Arc<dyn Fn(Arc<T>, InvocationArgs) -> InvocationResult + Send + Sync>;

type PropertyGetter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

pub struct MethodDescriptor<T> {
    name: String,
    interceptors: Vec<InterceptorOrKey>,
    handler: MethodHandler<T>,
}

impl<T> MethodDescriptor<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method-level interceptors, in declaration order.
    pub fn interceptors(&self) -> &[InterceptorOrKey] {
        &self.interceptors
    }

    pub(crate) fn handler(&self) -> MethodHandler<T> {
        self.handler.clone()
    }
}

/// The interceptable surface of a type: its methods, its properties and the
/// interceptors declared on both the type and each method.
pub struct TargetDescriptor<T> {
    name: String,
    class_interceptors: Vec<InterceptorOrKey>,
    methods: Vec<MethodDescriptor<T>>,
    properties: Vec<(String, PropertyGetter<T>)>,
}

impl<T: Send + Sync + 'static> TargetDescriptor<T> {
    pub fn builder(name: impl Into<String>) -> TargetDescriptorBuilder<T> {
        TargetDescriptorBuilder {
            descriptor: TargetDescriptor {
                name: name.into(),
                class_interceptors: Vec::new(),
                methods: Vec::new(),
                properties: Vec::new(),
            },
            declarations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_interceptors(&self) -> &[InterceptorOrKey] {
        &self.class_interceptors
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor<T>> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|(property, _)| property == name)
    }

    pub fn property(&self, target: &T, name: &str) -> Option<Value> {
        self.properties
            .iter()
            .find(|(property, _)| property == name)
            .map(|(_, getter)| getter(target))
    }

    /// Class-level interceptors merged ahead of the method's own.
    pub fn interceptors_for(&self, method: &str) -> Option<Vec<InterceptorOrKey>> {
        self.method(method)
            .map(|m| merge_interceptors(&self.class_interceptors, &m.interceptors))
    }
}

/// Builds a [`TargetDescriptor`].
///
/// Interceptor declarations are checked in [`build`](Self::build), so they may
/// name methods registered later in the chain.
///
/// ```
/// use meshestra_context::interceptor::TargetDescriptor;
/// use serde_json::json;
///
/// struct Greeter {
///     prefix: String,
/// }
///
/// let descriptor = TargetDescriptor::<Greeter>::builder("Greeter")
///     .intercept_class(["log"])
///     .method("greet", |g: &Greeter, args| {
///         Ok(json!(format!("{} {}", g.prefix, args[0].as_str().unwrap_or(""))))
///     })
///     .intercept("greet", ["cache"])
///     .property("prefix", |g: &Greeter| json!(g.prefix))
///     .build()
///     .unwrap();
/// assert_eq!(descriptor.interceptors_for("greet").unwrap().len(), 2);
/// ```
pub struct TargetDescriptorBuilder<T> {
    descriptor: TargetDescriptor<T>,
    declarations: Vec<(String, Vec<InterceptorOrKey>)>,
}

impl<T: Send + Sync + 'static> TargetDescriptorBuilder<T> {
    /// Adds class-level interceptors. Later calls run after earlier ones.
    pub fn intercept_class<I>(mut self, interceptors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<InterceptorOrKey>,
    {
        let added: Vec<InterceptorOrKey> = interceptors.into_iter().map(Into::into).collect();
        self.descriptor.class_interceptors =
            merge_interceptors(&self.descriptor.class_interceptors, &added);
        self
    }

    /// Declares interceptors for the method `member`.
    pub fn intercept<I>(mut self, member: &str, interceptors: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<InterceptorOrKey>,
    {
        self.declarations.push((
            member.to_string(),
            interceptors.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&T, InvocationArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler: MethodHandler<T> = Arc::new(move |target: Arc<T>, args: InvocationArgs| {
            ValueOrFuture::from(f(&target, args).map_err(ContextError::from))
        });
        self.add_method(name, handler)
    }

    pub fn async_method<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>, InvocationArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler<T> = Arc::new(move |target: Arc<T>, args: InvocationArgs| {
            let future = f(target, args);
            ValueOrFuture::pending(async move { future.await.map_err(ContextError::from) })
        });
        self.add_method(name, handler)
    }

    /// Exposes a read-only property. Properties pass through proxies
    /// untouched and cannot be intercepted.
    pub fn property<F>(mut self, name: &str, getter: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let getter: PropertyGetter<T> = Arc::new(getter);
        self.descriptor.properties.push((name.to_string(), getter));
        self
    }

    fn add_method(mut self, name: &str, handler: MethodHandler<T>) -> Self {
        match self.descriptor.methods.iter_mut().find(|m| m.name == name) {
            Some(existing) => existing.handler = handler,
            None => self.descriptor.methods.push(MethodDescriptor {
                name: name.to_string(),
                interceptors: Vec::new(),
                handler,
            }),
        }
        self
    }

    pub fn build(self) -> Result<TargetDescriptor<T>> {
        let mut descriptor = self.descriptor;
        for (member, interceptors) in self.declarations {
            if descriptor.has_property(&member) {
                return Err(ContextError::InterceptorTargetInvalid {
                    target: format!("{}.{}", descriptor.name, member),
                    reason: "interceptors cannot be declared on a property".to_string(),
                });
            }
            let target_name = descriptor.name.clone();
            let Some(method) = descriptor.methods.iter_mut().find(|m| m.name == member) else {
                return Err(ContextError::MethodNotFound {
                    target: target_name,
                    method: member,
                });
            };
            method.interceptors = merge_interceptors(&method.interceptors, &interceptors);
        }
        Ok(descriptor)
    }
}

/// Types whose methods can be invoked through the interceptor chain.
///
/// ```
/// use meshestra_context::interceptor::{Interceptable, TargetDescriptor};
/// use std::sync::LazyLock;
///
/// struct Counter;
///
/// static COUNTER: LazyLock<TargetDescriptor<Counter>> = LazyLock::new(|| {
///     TargetDescriptor::builder("Counter")
///         .method("zero", |_: &Counter, _| Ok(0.into()))
///         .build()
///         .expect("valid descriptor")
/// });
///
/// impl Interceptable for Counter {
///     fn descriptor() -> &'static TargetDescriptor<Self> {
///         &COUNTER
///     }
/// }
/// ```
pub trait Interceptable: Send + Sync + Sized + 'static {
    fn descriptor() -> &'static TargetDescriptor<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter;

    fn builder() -> TargetDescriptorBuilder<Greeter> {
        TargetDescriptor::builder("Greeter")
            .method("greet", |_: &Greeter, _| Ok(json!("hi")))
            .property("name", |_: &Greeter| json!("greeter"))
    }

    #[test]
    fn test_intercept_property_rejected() {
        let err = builder().intercept("name", ["log"]).build().err().unwrap();
        assert!(matches!(err, ContextError::InterceptorTargetInvalid { .. }));
    }

    #[test]
    fn test_intercept_unknown_method() {
        let err = builder().intercept("wave", ["log"]).build().err().unwrap();
        assert_eq!(err.to_string(), "Method wave not found on Greeter");
    }

    #[test]
    fn test_repeated_declarations_merge() {
        let descriptor = builder()
            .intercept("greet", ["log"])
            .intercept("greet", ["log", "cache"])
            .intercept_class(["cache"])
            .build()
            .unwrap();
        let keys: Vec<InterceptorOrKey> = vec!["log".into(), "cache".into()];
        assert_eq!(descriptor.method("greet").unwrap().interceptors(), keys.as_slice());
        // The class-level `cache` is already on the method.
        assert_eq!(descriptor.interceptors_for("greet").unwrap(), keys);
    }

    #[test]
    fn test_property_read() {
        let descriptor = builder().build().unwrap();
        assert_eq!(descriptor.property(&Greeter, "name"), Some(json!("greeter")));
        assert_eq!(descriptor.property(&Greeter, "greet"), None);
        assert_eq!(descriptor.method_names().collect::<Vec<_>>(), vec!["greet"]);
    }
}
