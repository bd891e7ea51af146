use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

/// Alias kept for call sites that read better with the longer name.
pub type ContextResult<T> = Result<T>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("The key '{key}' is not bound to any value in context {context}")]
    BindingNotFound { key: String, context: String },

    #[error("Duplicate binding key '{key}' in context {context}")]
    DuplicateBinding { key: String, context: String },

    #[error("Circular dependency detected: {path}")]
    CircularDependency { path: String },

    #[error("Maximum resolution depth {depth} exceeded while resolving '{key}'")]
    ResolutionDepthExceeded { key: String, depth: usize },

    #[error("Error resolving '{key}': {source}")]
    StrategyExecution {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cannot get {target} synchronously: the value is a future")]
    AsyncValue { target: String },

    #[error("Configuration '{key}' cannot be resolved")]
    ConfigurationNotResolvable { key: String },

    #[error("Interceptors cannot be declared on {target}: {reason}")]
    InterceptorTargetInvalid { target: String, reason: String },

    #[error("Method {method} not found on {target}")]
    MethodNotFound { target: String, method: String },

    #[error("Value of '{key}' is not of type {type_name}")]
    DowncastFailed { key: String, type_name: String },

    #[error(transparent)]
    Other(anyhow::Error),
}

impl ContextError {
    pub fn binding_not_found(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self::BindingNotFound {
            key: key.into(),
            context: context.into(),
        }
    }

    pub fn downcast_failed<T: ?Sized>(key: impl Into<String>) -> Self {
        Self::DowncastFailed {
            key: key.into(),
            type_name: std::any::type_name::<T>().to_string(),
        }
    }

    /// Wraps an error raised by user code running on behalf of `key`.
    ///
    /// Context errors travelling through user code keep their kind.
    pub fn strategy(key: impl Into<String>, error: anyhow::Error) -> Self {
        match error.downcast::<ContextError>() {
            Ok(inner) => inner,
            Err(source) => Self::StrategyExecution {
                key: key.into(),
                source,
            },
        }
    }

    /// True for the failures that `optional` resolution turns into `None`.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BindingNotFound { .. } | Self::ConfigurationNotResolvable { .. }
        )
    }
}

impl From<anyhow::Error> for ContextError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ContextError>() {
            Ok(inner) => inner,
            Err(other) => Self::Other(other),
        }
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ContextError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ContextError::MethodNotFound { .. } => axum::http::StatusCode::NOT_FOUND,
            ContextError::InterceptorTargetInvalid { .. } => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
