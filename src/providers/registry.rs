//! Provider registry: static lookup from [`ProviderKind`] to adapter constructor.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ProviderSettings;
use crate::error::ErrorContext;
use crate::providers::{auger, azure, google, Provider, ProviderKind};
use crate::{Error, Result};

/// Adapter constructor. Receives the adapter's own configuration slice.
pub type ProviderFactory =
    Arc<dyn Fn(ProviderSettings) -> Result<Box<dyn Provider>> + Send + Sync>;

type Constructor = fn(ProviderSettings) -> Result<Box<dyn Provider>>;

/// Built-in adapters. Adding a provider means adding a [`ProviderKind`]
/// variant and one row here.
static BUILTIN: [(ProviderKind, Constructor); 3] = [
    (ProviderKind::Auger, auger::create),
    (ProviderKind::Google, google::create),
    (ProviderKind::Azure, azure::create),
];

#[derive(Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<ProviderKind, ProviderFactory>,
}

impl ProviderRegistry {
    /// Registry with every built-in adapter.
    pub fn builtin() -> Self {
        let factories = BUILTIN
            .iter()
            .map(|(kind, ctor)| {
                let ctor = *ctor;
                (*kind, Arc::new(ctor) as ProviderFactory)
            })
            .collect();
        Self { factories }
    }

    /// Registry without any adapters.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(ProviderSettings) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Construct the adapter for `kind`.
    pub fn create(&self, kind: ProviderKind, settings: ProviderSettings) -> Result<Box<dyn Provider>> {
        let factory = self.factories.get(&kind).ok_or_else(|| {
            Error::configuration_with_context(
                format!("no adapter registered for provider '{}'", kind),
                ErrorContext::new()
                    .with_field_path("config/providers")
                    .with_source("provider_registry"),
            )
        })?;
        factory(settings)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
