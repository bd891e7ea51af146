//! # Meshestra Context
//!
//! A hierarchical dependency-resolution context with live binding views and
//! method interception.
//!
//! ## Features
//!
//! - **Hierarchical Contexts**: child contexts see their parents' bindings and may shadow them
//! - **Binding Scopes**: transient, context, singleton and request-scoped values
//! - **Cycle Detection**: resolution sessions report `A --> B --> A` paths
//! - **Context Views**: live, tag-filtered sets of bindings for extension points
//! - **Configuration**: per-binding configuration with `key#path` projection
//! - **Interceptors**: global, class and method interceptors merged into one chain
//!
//! ## Quick Start
//!
//! ```rust
//! use meshestra_context::prelude::*;
//!
//! #[derive(Injectable)]
//! struct Greeter {
//!     #[inject("greeting.prefix")]
//!     prefix: Arc<String>,
//!     #[config("lang")]
//!     lang: Option<String>,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<()> {
//! let app = ContextBuilder::new()
//!     .name("app")
//!     .settings(ContextSettings::from_env())
//!     .build();
//!
//! app.bind("greeting.prefix")?.to("Hello".to_string());
//! app.bind("greeter")?
//!     .to_class::<Greeter>()
//!     .in_scope(BindingScope::Singleton);
//! app.configure("greeter").to(serde_json::json!({"lang": "en"}));
//!
//! let request = app.child_named("request");
//! let greeter = request.get_async::<Greeter>("greeter").await?;
//! assert_eq!(greeter.prefix.as_str(), "Hello");
//! assert_eq!(greeter.lang.as_deref(), Some("en"));
//! # Ok(())
//! # }
//! ```

extern crate self as meshestra_context;

pub mod aspect;
pub mod common;
pub mod config;
pub mod context;
pub mod di;
pub mod error;
pub mod interceptor;
pub mod module;

// Re-export core types
pub use common::{BoxedValue, ValueOrFuture};
pub use config::ContextSettings;
pub use context::{Context, ContextBuilder, ContextView};
pub use di::{Binding, BindingKey, BindingScope, Injectable, Provider, ResolutionOptions};
pub use error::{ContextError, ContextResult, Result};
pub use interceptor::{
    InterceptionProxy, Interceptor, InvocationContext, Next, invoke_method_with_interceptors,
};
pub use module::Module;

// Re-export macros
pub use meshestra_context_macro::Injectable as DeriveInjectable;

// Re-export commonly used types from dependencies
pub use anyhow;
pub use async_trait::async_trait;
pub use serde_json;

/// Prelude module for convenient imports
///
/// ```
/// use meshestra_context::prelude::*;
/// ```
pub mod prelude {
    pub use crate::DeriveInjectable as Injectable;
    pub use crate::aspect::{Aspect, AspectInterceptor, AspectResult};
    pub use crate::common::{BoxedValue, ValueOrFuture};
    pub use crate::config::ContextSettings;
    pub use crate::context::{
        ConfigGetter, ConfigView, ConfigurationResolver, Context, ContextBuilder, ContextView,
        filter_by_key, filter_by_tag,
    };
    pub use crate::di::{
        Binding, BindingKey, BindingScope, Getter, InjectedArgs, Injectable, Injection, Provider,
        ResolutionContext, ResolutionOptions, ResolutionSession,
    };
    pub use crate::error::{ContextError, ContextResult, Result};
    pub use crate::interceptor::{
        Interceptable, InterceptionEngine, InterceptionProxy, Interceptor, InterceptorOrKey,
        InvocationArgs, InvocationContext, InvocationResult, LoggingInterceptor, Next,
        TargetDescriptor, async_interceptor_fn, interceptor_fn, invoke_method_with_interceptors,
    };
    pub use crate::module::Module;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
