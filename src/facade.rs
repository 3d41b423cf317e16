//! Dispatch facade: one logical operation fanned out to every configured provider.
//!
//! Adapters are built once, in selection order, when the facade is constructed;
//! construction is all-or-nothing. Each operation then runs on every adapter in
//! that order, one at a time, with the same arguments. A failing adapter never
//! stops the ones after it: the outcome of every provider is collected into a
//! [`DispatchReport`].

use crate::config::Config;
use crate::providers::{Outcome, PredictRequest, Provider, ProviderKind, ProviderRegistry};
use crate::{Error, Result};
use std::path::PathBuf;
use tracing::Instrument;

/// One facade operation together with its provider-agnostic arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ImportData,
    Train,
    Evaluate,
    Deploy {
        model_id: Option<String>,
        locally: bool,
    },
    Predict(PredictRequest),
    Review,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ImportData => "import",
            Operation::Train => "train",
            Operation::Evaluate => "evaluate",
            Operation::Deploy { .. } => "deploy",
            Operation::Predict(_) => "predict",
            Operation::Review => "review",
        }
    }

    /// Operations that change remote state. Their failures fail the whole run.
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            Operation::ImportData | Operation::Train | Operation::Deploy { .. }
        )
    }
}

/// Result of one provider for one operation.
#[derive(Debug)]
pub struct ProviderReport {
    pub provider: ProviderKind,
    pub result: Result<Outcome>,
}

/// Per-provider results of one dispatched operation, in dispatch order.
#[derive(Debug)]
pub struct DispatchReport {
    operation: &'static str,
    side_effecting: bool,
    entries: Vec<ProviderReport>,
}

impl DispatchReport {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderReport> {
        self.entries.iter()
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Result<Outcome>> {
        self.entries
            .iter()
            .find(|e| e.provider == kind)
            .map(|e| &e.result)
    }

    pub fn failures(&self) -> impl Iterator<Item = (ProviderKind, &Error)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.provider, err)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// A side-effecting operation failed on at least one provider.
    pub fn is_fatal(&self) -> bool {
        self.side_effecting && !self.is_success()
    }

    /// Turn a fatal report into [`Error::Dispatch`]; anything else is returned as is.
    pub fn into_result(self) -> Result<DispatchReport> {
        if !self.is_fatal() {
            return Ok(self);
        }
        let failures = self
            .failures()
            .map(|(kind, err)| (kind.id().to_string(), err.to_string()))
            .collect();
        Err(Error::Dispatch {
            operation: self.operation.to_string(),
            failures,
        })
    }
}

/// Facade over the configured provider adapters.
#[derive(Debug)]
pub struct A2ml {
    providers: Vec<Box<dyn Provider>>,
}

impl A2ml {
    /// Build adapters for the configured providers using the built-in registry.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_registry(config, &ProviderRegistry::builtin())
    }

    /// Build adapters for the configured providers using `registry`.
    ///
    /// Fails on the first provider that cannot be constructed; no partial facade
    /// is returned.
    pub fn with_registry(config: &Config, registry: &ProviderRegistry) -> Result<Self> {
        let selection = config.provider_selection()?;
        let mut providers = Vec::with_capacity(selection.len());
        for kind in selection {
            let provider = registry.create(kind, config.settings_for(kind))?;
            tracing::debug!(provider = %kind, "adapter constructed");
            providers.push(provider);
        }
        Ok(Self { providers })
    }

    /// Facade over already constructed adapters.
    pub fn from_providers(providers: Vec<Box<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Selected providers, in dispatch order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    pub async fn import_data(&mut self) -> DispatchReport {
        self.dispatch(Operation::ImportData).await
    }

    pub async fn train(&mut self) -> DispatchReport {
        self.dispatch(Operation::Train).await
    }

    pub async fn evaluate(&mut self) -> DispatchReport {
        self.dispatch(Operation::Evaluate).await
    }

    pub async fn deploy(&mut self, model_id: Option<&str>, locally: bool) -> DispatchReport {
        self.dispatch(Operation::Deploy {
            model_id: model_id.map(str::to_string),
            locally,
        })
        .await
    }

    pub async fn predict(
        &mut self,
        filename: impl Into<PathBuf>,
        model_id: Option<&str>,
        threshold: Option<f64>,
        locally: bool,
    ) -> DispatchReport {
        self.dispatch(Operation::Predict(PredictRequest {
            filename: filename.into(),
            model_id: model_id.map(str::to_string),
            threshold,
            locally,
        }))
        .await
    }

    pub async fn review(&mut self) -> DispatchReport {
        self.dispatch(Operation::Review).await
    }

    /// Run `operation` on every adapter, strictly in selection order.
    pub async fn dispatch(&mut self, operation: Operation) -> DispatchReport {
        let name = operation.name();
        let mut entries = Vec::with_capacity(self.providers.len());

        for provider in self.providers.iter_mut() {
            let kind = provider.kind();
            let span = tracing::info_span!("provider", provider = kind.id(), operation = name);
            let result = invoke(provider, &operation).instrument(span).await;

            let result = match result {
                Err(err) if err.is_already_satisfied() => {
                    tracing::warn!(provider = kind.id(), operation = name, "{}", err);
                    Ok(Outcome::AlreadySatisfied(err.to_string()))
                }
                Err(err) => {
                    tracing::error!(provider = kind.id(), operation = name, "{}", err);
                    Err(err)
                }
                Ok(outcome) => {
                    tracing::info!(provider = kind.id(), operation = name, "{}", outcome);
                    Ok(outcome)
                }
            };
            entries.push(ProviderReport {
                provider: kind,
                result,
            });
        }

        DispatchReport {
            operation: name,
            side_effecting: operation.is_side_effecting(),
            entries,
        }
    }
}

async fn invoke(provider: &mut Box<dyn Provider>, operation: &Operation) -> Result<Outcome> {
    match operation {
        Operation::ImportData => provider.import_data().await,
        Operation::Train => provider.train().await,
        Operation::Evaluate => provider.evaluate().await,
        Operation::Deploy { model_id, locally } => {
            provider.deploy(model_id.as_deref(), *locally).await
        }
        Operation::Predict(request) => provider.predict(request).await,
        Operation::Review => provider.review().await,
    }
}
