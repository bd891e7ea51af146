use crate::error::{ContextError, Result};
use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased value produced by a binding.
pub type BoxedValue = Arc<dyn Any + Send + Sync>;

/// The outcome of a step that may or may not need to wait.
///
/// `Ready` carries a result that is already available, `Pending` a future that
/// still has to be driven. Combinators keep ready values ready, so a chain of
/// synchronous steps never allocates a future and can be read with
/// [`ValueOrFuture::into_sync`]. Awaiting works on both variants through
/// [`IntoFuture`].
pub enum ValueOrFuture<T> {
    Ready(Result<T>),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T: Send + 'static> ValueOrFuture<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn failed(error: ContextError) -> Self {
        Self::Ready(Err(error))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn map<U, F>(self, f: F) -> ValueOrFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Self::Ready(result) => ValueOrFuture::Ready(result.map(f)),
            Self::Pending(future) => ValueOrFuture::pending(async move { future.await.map(f) }),
        }
    }

    pub fn and_then<U, F>(self, f: F) -> ValueOrFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ValueOrFuture<U> + Send + 'static,
    {
        match self {
            Self::Ready(Ok(value)) => f(value),
            Self::Ready(Err(error)) => ValueOrFuture::failed(error),
            Self::Pending(future) => ValueOrFuture::pending(async move { f(future.await?).await }),
        }
    }

    pub fn map_err<F>(self, f: F) -> Self
    where
        F: FnOnce(ContextError) -> ContextError + Send + 'static,
    {
        match self {
            Self::Ready(result) => Self::Ready(result.map_err(f)),
            Self::Pending(future) => Self::pending(async move { future.await.map_err(f) }),
        }
    }

    /// Recovers from an error with another step.
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(ContextError) -> ValueOrFuture<T> + Send + 'static,
    {
        match self {
            Self::Ready(Ok(value)) => Self::ready(value),
            Self::Ready(Err(error)) => f(error),
            Self::Pending(future) => Self::pending(async move {
                match future.await {
                    Ok(value) => Ok(value),
                    Err(error) => f(error).await,
                }
            }),
        }
    }

    /// Runs `f` on the result once it is available, without changing it.
    pub fn inspect_result<F>(self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        match self {
            Self::Ready(result) => {
                f(&result);
                Self::Ready(result)
            }
            Self::Pending(future) => Self::pending(async move {
                let result = future.await;
                f(&result);
                result
            }),
        }
    }

    /// Returns the ready result, or an [`ContextError::AsyncValue`] naming
    /// `target` if the value is still pending. The pending future is dropped.
    pub fn into_sync(self, target: impl FnOnce() -> String) -> Result<T> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(_) => Err(ContextError::AsyncValue { target: target() }),
        }
    }

    /// Drives a list of steps in order, staying ready when every step is ready.
    pub fn collect(items: Vec<ValueOrFuture<T>>) -> ValueOrFuture<Vec<T>> {
        if items.iter().any(ValueOrFuture::is_pending) {
            return ValueOrFuture::pending(async move {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(item.await?);
                }
                Ok(values)
            });
        }

        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Self::Ready(Ok(value)) => values.push(value),
                Self::Ready(Err(error)) => return ValueOrFuture::failed(error),
                Self::Pending(_) => unreachable!("pending items were handled above"),
            }
        }
        ValueOrFuture::ready(values)
    }
}

impl<T: Send + 'static> From<Result<T>> for ValueOrFuture<T> {
    fn from(result: Result<T>) -> Self {
        Self::Ready(result)
    }
}

impl<T: Send + 'static> IntoFuture for ValueOrFuture<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(result) => Box::pin(std::future::ready(result)),
            Self::Pending(future) => future,
        }
    }
}

impl<T> fmt::Debug for ValueOrFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(Ok(_)) => f.write_str("Ready(Ok(..))"),
            Self::Ready(Err(error)) => write!(f, "Ready(Err({error}))"),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}
