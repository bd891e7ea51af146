use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

pub const MAX_RESOLUTION_DEPTH_VAR: &str = "MESHESTRA_MAX_RESOLUTION_DEPTH";
pub const EVENT_CHANNEL_CAPACITY_VAR: &str = "MESHESTRA_EVENT_CHANNEL_CAPACITY";

pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 100;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Snapshot of key/value settings, usually loaded from the process environment.
#[derive(Clone, Default)]
pub struct EnvSource {
    vars: Arc<DashMap<String, String>>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the current process environment.
    pub fn load() -> Self {
        let source = Self::default();
        for (key, value) in env::vars() {
            source.set(&key, &value);
        }
        source
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }
}

/// Tunables shared by a context and its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Longest binding chain a single resolution may walk.
    pub max_resolution_depth: usize,
    /// Buffer size of the context and view event channels.
    pub event_channel_capacity: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ContextSettings {
    pub fn from_env() -> Self {
        Self::from_source(&EnvSource::load())
    }

    /// Reads settings from `source`, keeping defaults for absent or malformed entries.
    pub fn from_source(source: &EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            max_resolution_depth: read_usize(source, MAX_RESOLUTION_DEPTH_VAR)
                .unwrap_or(defaults.max_resolution_depth),
            event_channel_capacity: read_usize(source, EVENT_CHANNEL_CAPACITY_VAR)
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.event_channel_capacity),
        }
    }
}

fn read_usize(source: &EnvSource, key: &str) -> Option<usize> {
    let raw = source.get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
