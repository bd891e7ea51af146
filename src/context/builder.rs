use crate::config::ContextSettings;
use crate::context::Context;
use uuid::Uuid;

/// Builder for a [`Context`].
///
/// Without a name the context gets a random UUID. Without explicit settings a
/// child inherits its parent's, and a root context uses the defaults.
///
/// # Example
/// ```
/// use meshestra_context::{ContextBuilder, ContextSettings};
///
/// let app = ContextBuilder::new()
///     .name("application")
///     .settings(ContextSettings::from_env())
///     .build();
/// let server = ContextBuilder::new().parent(&app).name("server").build();
/// assert_eq!(server.parent().map(|p| p.name()), Some("application"));
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    name: Option<String>,
    parent: Option<Context>,
    settings: Option<ContextSettings>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn settings(mut self, settings: ContextSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Context {
        let settings = self
            .settings
            .or_else(|| self.parent.as_ref().map(|p| p.settings().clone()))
            .unwrap_or_default();
        let name = self.name.unwrap_or_else(|| Uuid::new_v4().to_string());
        Context::from_parts(name, self.parent, settings)
    }
}
