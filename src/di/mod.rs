mod binding;
mod binding_key;
mod getter;
mod injectable;
mod resolution;

pub use binding::{
    AsyncDynamicFactory, Binding, BindingScope, BindingSource, BindingType, DynamicFactory,
    InjectedFactory,
};
pub use binding_key::{BindingKey, CONFIG_NAMESPACE, PROPERTY_SEPARATOR};
pub use getter::Getter;
pub use injectable::{InjectedArgs, Injectable, Injection, Provider};
pub use resolution::{RequestScope, ResolutionContext, ResolutionOptions, ResolutionSession};

pub(crate) use binding::WeakBinding;
pub(crate) use resolution::CachedValue;
