use crate::context::Context;
use crate::error::Result;

/// A group of bindings registered together.
///
/// # Example
/// ```
/// use meshestra_context::prelude::*;
///
/// struct GreetingModule;
///
/// impl Module for GreetingModule {
///     fn register(context: &Context) -> Result<()> {
///         context.bind("greeting.prefix")?.to("Hello".to_string());
///         context.configure("greeting").to(serde_json::json!({"lang": "en"}));
///         Ok(())
///     }
/// }
///
/// let ctx = Context::new();
/// ctx.mount::<GreetingModule>().unwrap();
/// assert!(ctx.is_bound("greeting.prefix"));
/// ```
pub trait Module {
    /// Registers this module's bindings into `context`.
    fn register(context: &Context) -> Result<()>;
}
