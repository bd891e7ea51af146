use crate::context::Context;
use crate::di::{BindingKey, ResolutionOptions, ResolutionSession};
use crate::error::{ContextError, Result};
use std::sync::Arc;

/// Deferred resolution of a binding.
///
/// A `Getter` holds the context and key it was created for and resolves the
/// value only when asked, every time it is asked. This is how a class can
/// depend on something that is bound later, or on a binding that would
/// otherwise form a construction cycle.
///
/// Getters created by injection carry a fork of the resolution session that
/// created them, so a cycle through a getter is still reported when it would
/// build a binding again. Values already cached by their scope are returned
/// as they are.
#[derive(Clone)]
pub struct Getter {
    context: Context,
    key: BindingKey,
    session: ResolutionSession,
}

impl Getter {
    pub fn new(context: Context, key: BindingKey, session: ResolutionSession) -> Self {
        Self {
            context,
            key,
            session,
        }
    }

    /// A getter with a fresh session, for use outside of injection.
    pub fn for_key(context: &Context, key: impl Into<BindingKey>) -> Self {
        Self::new(context.clone(), key.into(), ResolutionSession::new())
    }

    pub fn key(&self) -> &BindingKey {
        &self.key
    }

    fn options(&self) -> ResolutionOptions {
        ResolutionOptions::default().with_session(self.session.fork())
    }

    fn not_found(&self) -> ContextError {
        ContextError::binding_not_found(self.key.to_string(), self.context.name())
    }

    pub async fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.context
            .get_async_with::<T>(&self.key, self.options())
            .await?
            .ok_or_else(|| self.not_found())
    }

    /// Fails with [`ContextError::AsyncValue`] when the value is computed
    /// asynchronously.
    pub fn get_sync<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.context
            .get_with::<T>(&self.key, self.options())?
            .ok_or_else(|| self.not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_getter_sees_late_bindings() {
        let ctx = Context::new();
        let getter = Getter::for_key(&ctx, "late");
        assert!(getter.get::<u32>().await.unwrap_err().is_not_found());

        ctx.bind("late").unwrap().to(3u32);
        assert_eq!(*getter.get::<u32>().await.unwrap(), 3);
        assert_eq!(*getter.get_sync::<u32>().unwrap(), 3);
    }

    #[test]
    fn test_getter_reads_rebound_value() {
        let ctx = Context::new();
        ctx.bind("n").unwrap().to(1u32);
        let getter = Getter::for_key(&ctx, "n");
        assert_eq!(*getter.get_sync::<u32>().unwrap(), 1);

        ctx.rebind("n").to(2u32);
        assert_eq!(*getter.get_sync::<u32>().unwrap(), 2);
    }
}
