//! Process-wide adapter lookup.
//!
//! The registry is populated during startup and read-only afterwards; sharing
//! it as an `Arc` keeps lookups lock-free on the request path.

use crate::adapters::Adapter;
use crate::error::GatewayError;
use std::collections::HashMap;
use std::sync::Arc;

/// Name → adapter mapping, immutable after initialization.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name. Startup only.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up the adapter for a provider name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Adapter>, GatewayError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider {
                name: name.to_string(),
            })
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
