//! Azure Machine Learning adapter (Resource Manager REST).
//!
//! Construction only reads configuration. The workspace and its compute
//! cluster are ensured by `import`; `train` submits an AutoML job whose id is
//! persisted as `run_id` for `evaluate`.

use crate::config::ProviderSettings;
use crate::error::ErrorContext;
use crate::providers::{Outcome, PredictRequest, Provider, ProviderKind};
use crate::transport::classify::is_conflict_class;
use crate::transport::{credentials, RestClient};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";
pub const SUBSCRIPTION_ENV: &str = "AZURE_SUBSCRIPTION_ID";

const RESOURCES_API_VERSION: &str = "2021-04-01";
const ML_API_VERSION: &str = "2023-04-01";

/// Registry constructor.
pub fn create(settings: ProviderSettings) -> Result<Box<dyn Provider>> {
    Ok(Box::new(AzureProvider::new(settings)?))
}

/// Experiment and compute settings read from `azure.yaml`.
#[derive(Debug, Clone, PartialEq)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub workspace: String,
    pub resource_group: String,
    pub metric: String,
    pub cross_validation_folds: u32,
    pub max_total_time: u64,
    pub iteration_timeout_minutes: u64,
    pub max_n_trials: u32,
    pub use_ensemble: bool,
    pub cluster_name: String,
    pub region: String,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub vm_size: String,
}

impl AzureSettings {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let own = &settings.own;
        let name = settings.name();
        let derived = |key: &str, suffix: &str| -> Result<String> {
            match (own.get_str(key), &name) {
                (Some(value), _) => Ok(value),
                (None, Some(name)) => Ok(format!("{}{}", name, suffix)),
                (None, None) => Err(Error::configuration_with_context(
                    format!("'{}' is not set and the project has no name", key),
                    ErrorContext::new().with_field_path(format!("azure/{}", key)),
                )),
            }
        };

        Ok(Self {
            subscription_id: own
                .get_str("subscription_id")
                .or_else(|| std::env::var(SUBSCRIPTION_ENV).ok()),
            workspace: derived("workspace", "_ws")?,
            resource_group: derived("resource_group", "_resources")?,
            metric: own
                .get_str("experiment/metric")
                .unwrap_or_else(|| "spearman_correlation".to_string()),
            cross_validation_folds: own.get_or("experiment/cross_validation_folds", 5)?,
            max_total_time: match settings.budget()? {
                Some(budget) => budget,
                None => own.get_or("experiment/max_total_time", 60)?,
            },
            iteration_timeout_minutes: own.get_or("experiment/iteration_timeout_minutes", 10)?,
            max_n_trials: own.get_or("experiment/max_n_trials", 10)?,
            use_ensemble: own.get_or("experiment/use_ensemble", false)?,
            cluster_name: own
                .get_str("cluster/name")
                .unwrap_or_else(|| "cpucluster".to_string()),
            region: own
                .get_str("cluster/region")
                .unwrap_or_else(|| "eastus2".to_string()),
            min_nodes: own.get_or("cluster/min_nodes", 0)?,
            max_nodes: own.get_or("cluster/max_nodes", 4)?,
            vm_size: own
                .get_str("cluster/type")
                .unwrap_or_else(|| "STANDARD_D2_V2".to_string()),
        })
    }
}

#[derive(Debug)]
pub struct AzureProvider {
    settings: ProviderSettings,
    azure: AzureSettings,
    rest: RestClient,
}

impl AzureProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let endpoint = settings
            .own
            .get_str("endpoint")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = credentials::resolve_token(ProviderKind::Azure.id(), TOKEN_ENV);
        let rest = RestClient::new(ProviderKind::Azure.id(), endpoint, token)?;
        Self::with_client(settings, rest)
    }

    pub fn with_client(settings: ProviderSettings, rest: RestClient) -> Result<Self> {
        let azure = AzureSettings::from_settings(&settings)?;
        Ok(Self {
            settings,
            azure,
            rest,
        })
    }

    pub fn azure_settings(&self) -> &AzureSettings {
        &self.azure
    }

    fn require_token(&self) -> Result<()> {
        if self.rest.has_token() {
            Ok(())
        } else {
            Err(Error::authentication(
                "azure",
                format!("no access token: store one with `a2ml auth login` or set {}", TOKEN_ENV),
            ))
        }
    }

    fn resource_group_path(&self) -> Result<String> {
        let subscription = self.azure.subscription_id.as_deref().ok_or_else(|| {
            Error::configuration_with_context(
                "Azure subscription is not set",
                ErrorContext::new()
                    .with_field_path("azure/subscription_id")
                    .with_details(format!("set `subscription_id` in azure.yaml or {}", SUBSCRIPTION_ENV)),
            )
        })?;
        Ok(format!(
            "subscriptions/{}/resourceGroups/{}",
            subscription, self.azure.resource_group
        ))
    }

    fn workspace_path(&self) -> Result<String> {
        Ok(format!(
            "{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
            self.resource_group_path()?,
            self.azure.workspace
        ))
    }

    fn experiment_name(&self) -> String {
        self.settings
            .name()
            .unwrap_or_else(|| "automl_remote".to_string())
    }

    /// GET a resource; `None` when it does not exist.
    async fn find(&self, path: &str) -> Result<Option<Value>> {
        match self
            .rest
            .get_query(path, &[("api-version", ML_API_VERSION)])
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(Error::RemoteService { class, .. }) if class == "not_found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// PUT that tolerates "already exists" conflicts.
    async fn put_tolerant(&self, path: &str, api_version: &str, body: &Value) -> Result<()> {
        let path = format!("{}?api-version={}", path, api_version);
        match self.rest.put(&path, body).await {
            Ok(_) => Ok(()),
            Err(Error::RemoteService { class, message, .. }) if is_conflict_class(&class) => {
                info!(error = message.as_str(), "resource already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_workspace(&self) -> Result<Value> {
        let workspace_path = self.workspace_path()?;
        if let Some(workspace) = self.find(&workspace_path).await? {
            return Ok(workspace);
        }
        info!(
            workspace = self.azure.workspace.as_str(),
            resource_group = self.azure.resource_group.as_str(),
            "creating workspace"
        );
        self.put_tolerant(
            &self.resource_group_path()?,
            RESOURCES_API_VERSION,
            &json!({ "location": self.azure.region }),
        )
        .await?;
        self.put_tolerant(
            &workspace_path,
            ML_API_VERSION,
            &json!({
                "location": self.azure.region,
                "identity": { "type": "SystemAssigned" },
                "properties": { "friendlyName": self.azure.workspace },
            }),
        )
        .await?;
        Ok(self.find(&workspace_path).await?.unwrap_or(Value::Null))
    }

    async fn ensure_compute(&self) -> Result<()> {
        let compute_path = format!("{}/computes/{}", self.workspace_path()?, self.azure.cluster_name);
        if self.find(&compute_path).await?.is_some() {
            info!(cluster = self.azure.cluster_name.as_str(), "found compute target");
            return Ok(());
        }
        info!(
            cluster = self.azure.cluster_name.as_str(),
            vm_size = self.azure.vm_size.as_str(),
            "creating compute target"
        );
        self.put_tolerant(
            &compute_path,
            ML_API_VERSION,
            &json!({
                "location": self.azure.region,
                "properties": {
                    "computeType": "AmlCompute",
                    "properties": {
                        "vmSize": self.azure.vm_size,
                        "scaleSettings": {
                            "minNodeCount": self.azure.min_nodes,
                            "maxNodeCount": self.azure.max_nodes,
                        },
                    },
                },
            }),
        )
        .await
    }

    /// AutoML job body submitted by `train`.
    pub fn job_body(&self, source: &str, target: &str) -> Result<Value> {
        let task_type = match self.settings.model_type().as_str() {
            "regression" => "Regression",
            "timeseries" => "Forecasting",
            _ => "Classification",
        };
        Ok(json!({
            "properties": {
                "jobType": "AutoML",
                "experimentName": self.experiment_name(),
                "computeId": format!("{}/computes/{}", self.workspace_path()?, self.azure.cluster_name),
                "taskDetails": {
                    "taskType": task_type,
                    "primaryMetric": self.azure.metric,
                    "targetColumnName": target,
                    "trainingData": { "uri": source, "jobInputType": "mltable" },
                    "nCrossValidations": { "mode": "Custom", "value": self.azure.cross_validation_folds },
                    "limitSettings": {
                        "maxTrials": self.azure.max_n_trials,
                        "timeout": format!("PT{}M", self.azure.max_total_time),
                        "trialTimeout": format!("PT{}M", self.azure.iteration_timeout_minutes),
                    },
                    "trainingSettings": { "enableStackEnsemble": self.azure.use_ensemble },
                    "featurizationSettings": { "dropColumns": self.settings.exclude() },
                },
            },
        }))
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    async fn import_data(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let workspace = self.ensure_workspace().await?;
        self.ensure_compute().await?;
        let location = workspace
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or(&self.azure.region);
        info!(
            subscription = self.azure.subscription_id.as_deref().unwrap_or(""),
            workspace = self.azure.workspace.as_str(),
            resource_group = self.azure.resource_group.as_str(),
            location,
            "workspace"
        );
        Ok(Outcome::Completed(Some(self.azure.workspace.clone())))
    }

    async fn train(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let source = self.settings.source().ok_or_else(|| {
            Error::configuration_with_context(
                "please specify a source (URL or local file)",
                ErrorContext::new().with_field_path("config/source"),
            )
        })?;
        let target = self.settings.target().ok_or_else(|| {
            Error::configuration_with_context(
                "target is not set",
                ErrorContext::new().with_field_path("config/target"),
            )
        })?;

        let run_id = format!("automl_{}", uuid::Uuid::new_v4().simple());
        let body = self.job_body(&source, &target)?;
        info!(run = run_id.as_str(), workspace = self.azure.workspace.as_str(), "submitting training run");
        self.rest
            .put(
                &format!("{}/jobs/{}?api-version={}", self.workspace_path()?, run_id, ML_API_VERSION),
                &body,
            )
            .await?;
        self.settings.own.set("run_id", run_id.as_str());
        self.settings.persist()?;
        Ok(Outcome::InProgress(run_id))
    }

    async fn evaluate(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let run_id = self.settings.own.get_str("run_id").ok_or_else(|| {
            Error::configuration_with_context(
                "'run_id' is not set",
                ErrorContext::new()
                    .with_field_path("azure/run_id")
                    .with_details("run `a2ml train` first"),
            )
        })?;
        let job = self
            .find(&format!("{}/jobs/{}", self.workspace_path()?, run_id))
            .await?
            .ok_or_else(|| Error::remote("not_found", format!("run {} not found", run_id)))?;
        let status = job
            .pointer("/properties/status")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        info!(run = run_id.as_str(), status = status.as_str(), "training run");
        match status.as_str() {
            "Completed" => Ok(Outcome::Completed(Some(run_id))),
            "Failed" | "Canceled" => Err(Error::remote(
                "training_failed",
                format!("run {} {}", run_id, status.to_lowercase()),
            )),
            _ => Ok(Outcome::InProgress(status)),
        }
    }

    async fn deploy(&mut self, _model_id: Option<&str>, _locally: bool) -> Result<Outcome> {
        Ok(Outcome::Unsupported)
    }

    async fn predict(&mut self, _request: &PredictRequest) -> Result<Outcome> {
        Ok(Outcome::Unsupported)
    }

    async fn review(&mut self) -> Result<Outcome> {
        Ok(Outcome::Unsupported)
    }
}
