use proc_macro::TokenStream;

mod injectable;

/// Derives `meshestra_context::di::Injectable` for a struct with named fields.
///
/// Field attributes:
///
/// - `#[inject("key")]` on `Arc<T>`, or on `Option<Arc<T>>` to make it optional.
///   `#[inject("key", getter)]` injects a `Getter` instead of the value.
/// - `#[inject(view_tag = "tag")]` injects an open `ContextView` of the tagged bindings.
/// - `#[config]`, `#[config("path")]` inject the configuration of the binding
///   being resolved. `Option<T>` fields are optional; other fields fail when the
///   configuration is missing. `getter` and `view` flags inject a `ConfigGetter`
///   or `ConfigView`.
///
/// Fields without an attribute are filled with `Default::default()`.
///
/// # Example
/// ```ignore
/// #[derive(Injectable)]
/// pub struct RestServer {
///     #[inject("logger")]
///     logger: Arc<Logger>,
///     #[config("port")]
///     port: Option<u16>,
/// }
/// ```
#[proc_macro_derive(Injectable, attributes(inject, config))]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    injectable::derive_injectable(input)
}
