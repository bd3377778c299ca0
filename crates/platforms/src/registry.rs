//! Registry of available platform adapters.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AdapterError;
use crate::facebook::FacebookPlatform;
use crate::platform::Platform;
use crate::twitter::TwitterPlatform;

/// Builds a fresh adapter instance.
pub type PlatformConstructor = Arc<dyn Fn() -> Box<dyn Platform> + Send + Sync>;

/// Maps platform names to adapter constructors.
///
/// Each worker builds its own instances from the same registry.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    constructors: BTreeMap<String, PlatformConstructor>,
}

impl PlatformRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FacebookPlatform::NAME, Arc::new(|| Box::new(FacebookPlatform::new())));
        registry.register(TwitterPlatform::NAME, Arc::new(|| Box::new(TwitterPlatform::new())));
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register(&mut self, name: impl Into<String>, constructor: PlatformConstructor) {
        self.constructors.insert(name.into().to_ascii_lowercase(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_ascii_lowercase())
    }

    /// Build a new adapter for `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Platform>, AdapterError> {
        self.constructors
            .get(&name.to_ascii_lowercase())
            .map(|ctor| ctor())
            .ok_or_else(|| AdapterError::UnsupportedPlatform(name.to_string()))
    }

    /// List all registered platforms.
    pub fn platforms(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
