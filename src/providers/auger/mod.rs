//! Auger.AI adapter.
//!
//! Talks to the Auger hub over REST and runs exported models locally through
//! the worker container (see [`crate::local`]).
//!
//! State persisted to `auger.yaml`:
//!
//! | Key | Written by |
//! |-----|------------|
//! | `project/id` | import |
//! | `dataset/id`, `dataset/name` | import |
//! | `experiment/id`, `experiment/session_id` | train |
//! | `experiment/best_trial` | evaluate |
//! | `pipeline/id` | deploy |

pub mod hub;

pub use hub::HubApi;

use crate::config::ProviderSettings;
use crate::error::ErrorContext;
use crate::local::{ContainerRunner, DockerRunner, LocalPredictor};
use crate::providers::{Outcome, PredictRequest, Provider, ProviderKind};
use crate::tabular::{predicted_path, Table};
use crate::transport::credentials;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable consulted for the hub token after the keyring.
pub const TOKEN_ENV: &str = "AUGER_API_TOKEN";

const DEFAULT_LEADERBOARD_SIZE: usize = 10;
const DEFAULT_MAX_TRIALS: u64 = 100;

/// Registry constructor.
pub fn create(settings: ProviderSettings) -> Result<Box<dyn Provider>> {
    Ok(Box::new(AugerProvider::new(settings)?))
}

pub struct AugerProvider<R = DockerRunner> {
    settings: ProviderSettings,
    hub: HubApi,
    predictor: LocalPredictor<R>,
}

impl AugerProvider<DockerRunner> {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let endpoint = settings
            .own
            .get_str("endpoint")
            .unwrap_or_else(|| hub::DEFAULT_ENDPOINT.to_string());
        let token = credentials::resolve_token(ProviderKind::Auger.id(), TOKEN_ENV);
        let hub = HubApi::new(&endpoint, token)?;
        Self::with_parts(settings, hub, DockerRunner::new())
    }
}

impl<R: ContainerRunner> AugerProvider<R> {
    /// Adapter over an explicit hub client and container runner.
    pub fn with_parts(settings: ProviderSettings, hub: HubApi, runner: R) -> Result<Self> {
        let tag = settings
            .own
            .get_str("cluster/kubernetes_stack")
            .unwrap_or_else(|| "stable".to_string());
        Ok(Self {
            settings,
            hub,
            predictor: LocalPredictor::new(runner, tag),
        })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn require_login(&self) -> Result<()> {
        if self.hub.is_authenticated() {
            Ok(())
        } else {
            Err(Error::authentication(
                "auger",
                format!("please login: run `a2ml auth login` or set {}", TOKEN_ENV),
            ))
        }
    }

    fn require(&self, key: &str, hint: &str) -> Result<String> {
        self.settings.own.get_str(key).ok_or_else(|| {
            Error::configuration_with_context(
                format!("'{}' is not set", key),
                ErrorContext::new()
                    .with_field_path(format!("auger/{}", key))
                    .with_details(hint.to_string()),
            )
        })
    }

    fn project_name(&self) -> Result<String> {
        self.settings
            .own
            .get_str("project/name")
            .or_else(|| self.settings.name())
            .ok_or_else(|| Error::configuration("project name is not set in config.yaml"))
    }

    /// Archive `deploy --locally` downloads for `model_id`.
    pub fn model_archive(&self, model_id: &str) -> PathBuf {
        self.settings
            .project_path("models")
            .join(format!("export_{}.zip", model_id))
    }

    async fn ensure_project(&mut self) -> Result<String> {
        if let Some(id) = self.settings.own.get_str("project/id") {
            return Ok(id);
        }
        let name = self.project_name()?;
        let id = match self.hub.find_project(&name).await? {
            Some(id) => id,
            None => {
                info!(project = name.as_str(), "creating Auger project");
                self.hub.create_project(&name).await?
            }
        };
        self.settings.own.set("project/id", id.as_str());
        Ok(id)
    }

    fn model_settings(&self) -> Result<Value> {
        let target = self.settings.target().ok_or_else(|| {
            Error::configuration_with_context(
                "target is not set",
                ErrorContext::new().with_field_path("config/target"),
            )
        })?;
        let mut model_settings = json!({
            "target": target,
            "model_type": self.settings.model_type(),
            "exclude": self.settings.exclude(),
            "max_n_trials": self.settings.own.get_or("experiment/max_n_trials", DEFAULT_MAX_TRIALS)?,
        });
        if let Some(budget) = self.settings.budget()? {
            model_settings["max_total_time_mins"] = json!(budget);
        }
        if let Some(metric) = self.settings.own.get_str("experiment/metric") {
            model_settings["scoring"] = json!(metric);
        }
        Ok(model_settings)
    }

    async fn predict_on_cloud(&self, request: &PredictRequest) -> Result<PathBuf> {
        self.require_login()?;
        let pipeline_id = match &request.model_id {
            Some(id) => id.clone(),
            None => self.require("pipeline/id", "pass --model-id or run `a2ml deploy` first")?,
        };

        let table = Table::read(&request.filename)?;
        let features = match self.settings.target() {
            Some(target) => table.without_column(&target),
            None => table,
        };
        let predictions = self
            .hub
            .predict(&pipeline_id, &features, request.threshold)
            .await?;

        let column = self
            .settings
            .target()
            .unwrap_or_else(|| "prediction".to_string());
        let output = predicted_path(&request.filename);
        features.with_column(&column, &predictions)?.write(&output)?;
        Ok(output)
    }

    async fn predict_locally(&self, request: &PredictRequest) -> Result<PathBuf> {
        let model_id = match &request.model_id {
            Some(id) => id.clone(),
            None => self.require("experiment/best_trial", "pass --model-id")?,
        };
        let archive = self.model_archive(&model_id);
        self.predictor
            .predict(&archive, &request.filename, request.threshold)
            .await
    }
}

impl<R> fmt::Debug for AugerProvider<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AugerProvider")
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R: ContainerRunner + 'static> Provider for AugerProvider<R> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Auger
    }

    async fn import_data(&mut self) -> Result<Outcome> {
        self.require_login()?;
        let source = self.settings.source().ok_or_else(|| {
            Error::configuration_with_context(
                "please specify a source (URL or local file)",
                ErrorContext::new().with_field_path("config/source"),
            )
        })?;
        let project_id = self.ensure_project().await?;

        let local = Path::new(&source);
        let (name, url) = if local.is_file() {
            info!(source = source.as_str(), "uploading data source");
            let url = self.hub.upload_file(&project_id, local).await?;
            let name = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.clone());
            (name, url)
        } else {
            let name = source.rsplit('/').next().unwrap_or(&source).to_string();
            (name, source.clone())
        };

        let dataset_id = self.hub.create_project_file(&project_id, &name, &url).await?;
        info!(dataset = dataset_id.as_str(), "dataset created");
        self.settings.own.set("dataset/id", dataset_id.as_str());
        self.settings.own.set("dataset/name", name.as_str());
        self.settings.persist()?;
        Ok(Outcome::Completed(Some(dataset_id)))
    }

    async fn train(&mut self) -> Result<Outcome> {
        self.require_login()?;
        let project_id = self.require("project/id", "run `a2ml import` first")?;
        let dataset_id = self.require("dataset/id", "run `a2ml import` first")?;
        let model_settings = self.model_settings()?;

        let name = match self.settings.own.get_str("experiment/name") {
            Some(name) => name,
            None => format!("{}-experiment", self.project_name()?),
        };
        let experiment_id = match self.settings.own.get_str("experiment/id") {
            Some(id) => id,
            None => {
                self.hub
                    .create_experiment(&project_id, &dataset_id, &name)
                    .await?
            }
        };
        self.settings.own.set("experiment/id", experiment_id.as_str());

        let session_id = self.hub.start_session(&experiment_id, &model_settings).await?;
        info!(experiment = experiment_id.as_str(), session = session_id.as_str(), "training started");
        self.settings.own.set("experiment/session_id", session_id.as_str());
        self.settings.persist()?;
        Ok(Outcome::InProgress(format!("experiment session {}", session_id)))
    }

    async fn evaluate(&mut self) -> Result<Outcome> {
        self.require_login()?;
        let session_id = self.require("experiment/session_id", "run `a2ml train` first")?;
        let session = self.hub.session(&session_id).await?;
        let status = session
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let size = self
            .settings
            .own
            .get_or("experiment/leaderboard_size", DEFAULT_LEADERBOARD_SIZE)?;
        let trials = self.hub.leaderboard(&session_id, size).await?;
        info!(session = session_id.as_str(), status = status.as_str(), trials = trials.len(), "leaderboard");
        for (rank, trial) in trials.iter().enumerate() {
            let id = trial.get("id").map(hub::scalar_to_string).unwrap_or_default();
            let algorithm = trial.get("algorithm_name").and_then(Value::as_str).unwrap_or("-");
            let score = trial.get("score").map(hub::scalar_to_string).unwrap_or_default();
            info!("{:>3}. {} {} score={}", rank + 1, id, algorithm, score);
        }

        match status.as_str() {
            "completed" => {
                let best = trials
                    .first()
                    .and_then(|t| t.get("id"))
                    .map(hub::scalar_to_string);
                if let Some(best) = &best {
                    self.settings.own.set("experiment/best_trial", best.as_str());
                    self.settings.persist()?;
                }
                Ok(Outcome::Completed(best))
            }
            "error" | "failed" => Err(Error::remote(
                "training_failed",
                session
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("experiment session failed")
                    .to_string(),
            )),
            _ => Ok(Outcome::InProgress(status)),
        }
    }

    async fn deploy(&mut self, model_id: Option<&str>, locally: bool) -> Result<Outcome> {
        self.require_login()?;
        let model_id = match model_id {
            Some(id) => id.to_string(),
            None => self.require("experiment/best_trial", "pass --model-id or run `a2ml evaluate` first")?,
        };

        if locally {
            let archive = self.model_archive(&model_id);
            let bytes = self.hub.download_export(&model_id, &archive).await?;
            info!(model = model_id.as_str(), path = %archive.display(), bytes, "model downloaded");
            return Ok(Outcome::Written(archive));
        }

        let pipeline_id = match self.hub.create_pipeline(&model_id).await {
            Ok(id) => id,
            Err(Error::RemoteService { status: Some(409), message, .. }) => {
                return Err(Error::already_satisfied(format!(
                    "model is already deployed: {}",
                    message
                )));
            }
            Err(e) => return Err(e),
        };
        info!(model = model_id.as_str(), pipeline = pipeline_id.as_str(), "pipeline created");
        self.settings.own.set("pipeline/id", pipeline_id.as_str());
        self.settings.persist()?;
        Ok(Outcome::Completed(Some(pipeline_id)))
    }

    async fn predict(&mut self, request: &PredictRequest) -> Result<Outcome> {
        info!(file = %request.filename.display(), locally = request.locally, "predicting");
        let output = if request.locally {
            self.predict_locally(request).await?
        } else {
            self.predict_on_cloud(request).await?
        };
        info!(path = %output.display(), "predictions stored");
        Ok(Outcome::Written(output))
    }

    async fn review(&mut self) -> Result<Outcome> {
        self.require_login()?;
        if let Some(pipeline_id) = self.settings.own.get_str("pipeline/id") {
            let pipeline = self.hub.pipeline(&pipeline_id).await?;
            let status = pipeline.get("status").and_then(Value::as_str).unwrap_or("unknown");
            let trial = pipeline.get("trial_id").map(hub::scalar_to_string).unwrap_or_default();
            info!(pipeline = pipeline_id.as_str(), status, trial = trial.as_str(), "pipeline");
            return Ok(Outcome::Completed(Some(pipeline_id)));
        }

        let session_id = self.require("experiment/session_id", "run `a2ml train` first")?;
        let session = self.hub.session(&session_id).await?;
        let status = session.get("status").and_then(Value::as_str).unwrap_or("unknown");
        let model_settings = session.get("model_settings").cloned().unwrap_or(Value::Null);
        info!(
            session = session_id.as_str(),
            status,
            settings = %model_settings,
            "experiment session"
        );
        Ok(Outcome::Completed(Some(session_id)))
    }
}
