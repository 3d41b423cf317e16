//! Provider adapters: one per AutoML back end, all behind the [`Provider`] trait.
//!
//! The facade never knows which vendor it is talking to. It asks the
//! [`ProviderRegistry`] to build one adapter per selected [`ProviderKind`] and
//! then drives them through the same six operations.

pub mod auger;
pub mod azure;
pub mod google;
pub mod kind;
pub mod registry;

pub use kind::ProviderKind;
pub use registry::{ProviderFactory, ProviderRegistry};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Arguments of a `predict` call, passed unchanged to every adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    /// Tabular input file (comma separated, header row first).
    pub filename: PathBuf,
    pub model_id: Option<String>,
    /// Minimum score a prediction must reach to be reported.
    pub threshold: Option<f64>,
    /// Run inference in a local container instead of the cloud endpoint.
    pub locally: bool,
}

impl PredictRequest {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            model_id: None,
            threshold: None,
            locally: false,
        }
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn locally(mut self, locally: bool) -> Self {
        self.locally = locally;
        self
    }
}

/// What a single adapter reports back for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Finished; optionally with the identifier of what was produced (dataset, model, ...).
    Completed(Option<String>),
    /// Accepted by the provider but still running remotely.
    InProgress(String),
    /// A file was produced locally (predictions, downloaded model).
    Written(PathBuf),
    /// The provider reported the requested state already exists or is under way.
    AlreadySatisfied(String),
    /// The provider has no implementation of this operation.
    Unsupported,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(Some(id)) => write!(f, "completed ({})", id),
            Outcome::Completed(None) => f.write_str("completed"),
            Outcome::InProgress(detail) => write!(f, "in progress ({})", detail),
            Outcome::Written(path) => write!(f, "written to {}", path.display()),
            Outcome::AlreadySatisfied(detail) => write!(f, "already satisfied ({})", detail),
            Outcome::Unsupported => f.write_str("not supported"),
        }
    }
}

/// Uniform operation set every AutoML back end implements.
///
/// Adapters own their configuration slice and network handles; nothing is
/// shared between two adapters. Errors are returned typed and are logged once
/// by the facade.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Stage the configured data source as a remote dataset.
    ///
    /// Not idempotent: every call may create a new remote dataset.
    async fn import_data(&mut self) -> Result<Outcome>;

    /// Submit a training job against previously imported data.
    async fn train(&mut self) -> Result<Outcome>;

    /// Query training status and results. Purely observational.
    async fn evaluate(&mut self) -> Result<Outcome>;

    /// Make a trained model servable, in the cloud or as a local artifact.
    async fn deploy(&mut self, model_id: Option<&str>, locally: bool) -> Result<Outcome>;

    /// Run inference over a tabular file, producing `<stem>_predicted.csv`.
    async fn predict(&mut self, request: &PredictRequest) -> Result<Outcome>;

    /// Present human-readable model metadata.
    async fn review(&mut self) -> Result<Outcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_request_builder() {
        let req = PredictRequest::new("data.csv")
            .model_id("model123")
            .threshold(0.5)
            .locally(true);
        assert_eq!(req.filename, PathBuf::from("data.csv"));
        assert_eq!(req.model_id.as_deref(), Some("model123"));
        assert_eq!(req.threshold, Some(0.5));
        assert!(req.locally);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Completed(Some("m1".into())).to_string(), "completed (m1)");
        assert_eq!(Outcome::Unsupported.to_string(), "not supported");
        assert_eq!(
            Outcome::Written(PathBuf::from("x_predicted.csv")).to_string(),
            "written to x_predicted.csv"
        );
    }
}
