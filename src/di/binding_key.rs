use std::fmt;

/// Namespace suffix of configuration bindings.
pub const CONFIG_NAMESPACE: &str = "$config";

/// Separates a binding key from the property path into its value.
pub const PROPERTY_SEPARATOR: char = '#';

/// A binding key, optionally narrowed to a property of the bound value.
///
/// `"application:$config#rest.port"` parses into the key
/// `application:$config` and the path `rest.port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    key: String,
    path: Option<String>,
}

impl BindingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: None,
        }
    }

    pub fn with_path(key: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            key: key.into(),
            path: (!path.is_empty()).then_some(path),
        }
    }

    /// Splits `key#path` at the first separator.
    pub fn parse(input: &str) -> Self {
        match input.split_once(PROPERTY_SEPARATOR) {
            Some((key, path)) => Self::with_path(key, path),
            None => Self::new(input),
        }
    }

    /// The key under which configuration for `key` is bound.
    pub fn build_key_for_config(key: &str) -> String {
        if key.is_empty() {
            CONFIG_NAMESPACE.to_string()
        } else {
            format!("{key}:{CONFIG_NAMESPACE}")
        }
    }

    pub fn config_for(key: &str, path: Option<&str>) -> Self {
        let config_key = Self::build_key_for_config(key);
        match path {
            Some(path) => Self::with_path(config_key, path),
            None => Self::new(config_key),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}{}{}", self.key, PROPERTY_SEPARATOR, path),
            None => f.write_str(&self.key),
        }
    }
}

impl From<&str> for BindingKey {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for BindingKey {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&String> for BindingKey {
    fn from(value: &String) -> Self {
        Self::parse(value)
    }
}

impl From<&BindingKey> for BindingKey {
    fn from(value: &BindingKey) -> Self {
        value.clone()
    }
}
