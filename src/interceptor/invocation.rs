use crate::context::Context;
use crate::interceptor::InvocationArgs;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct InvocationInner {
    context: Context,
    target: Arc<dyn Any + Send + Sync>,
    target_name: String,
    method_name: String,
    args: Mutex<InvocationArgs>,
}

/// One intercepted method call.
///
/// Owns a child of the caller's context, so interceptors can bind
/// per-call values without touching the caller. Arguments may be rewritten
/// by interceptors before the target runs.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<InvocationInner>,
}

impl InvocationContext {
    pub fn new(
        parent: &Context,
        target: Arc<dyn Any + Send + Sync>,
        target_name: impl Into<String>,
        method_name: impl Into<String>,
        args: InvocationArgs,
    ) -> Self {
        Self {
            inner: Arc::new(InvocationInner {
                context: parent.child(),
                target,
                target_name: target_name.into(),
                method_name: method_name.into(),
                args: Mutex::new(args),
            }),
        }
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn target_name(&self) -> &str {
        &self.inner.target_name
    }

    pub fn method_name(&self) -> &str {
        &self.inner.method_name
    }

    /// `Target.method`
    pub fn description(&self) -> String {
        format!("{}.{}", self.inner.target_name, self.inner.method_name)
    }

    pub fn target<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner.target.clone().downcast::<T>().ok()
    }

    fn lock_args(&self) -> MutexGuard<'_, InvocationArgs> {
        self.inner.args.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn args(&self) -> InvocationArgs {
        self.lock_args().clone()
    }

    pub fn arg(&self, index: usize) -> Option<Value> {
        self.lock_args().get(index).cloned()
    }

    /// Replaces the argument at `index`, padding with nulls if needed.
    pub fn set_arg(&self, index: usize, value: impl Into<Value>) {
        let mut args = self.lock_args();
        if args.len() <= index {
            args.resize(index + 1, Value::Null);
        }
        args[index] = value.into();
    }

    pub fn set_args(&self, args: InvocationArgs) {
        *self.lock_args() = args;
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("context", &self.inner.context.name())
            .field("target", &self.inner.target_name)
            .field("method", &self.inner.method_name)
            .field("args", &*self.lock_args())
            .finish()
    }
}
