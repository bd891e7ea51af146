pub mod path;
pub mod value;

pub use path::get_deep_property;
pub use value::{BoxFuture, BoxedValue, ValueOrFuture};
