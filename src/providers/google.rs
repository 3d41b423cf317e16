//! Google Cloud AutoML Tables adapter (v1beta1 REST).
//!
//! Resource names are full paths (`projects/<p>/locations/<r>/datasets/<id>`),
//! joined onto the service endpoint. Long-running calls return an operation
//! whose name is polled or persisted for a later `evaluate`.

use crate::config::ProviderSettings;
use crate::error::ErrorContext;
use crate::providers::{Outcome, PredictRequest, Provider, ProviderKind};
use crate::tabular::{predicted_path, Table};
use crate::transport::{credentials, RestClient};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://automl.googleapis.com/v1beta1";
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const DEFAULT_REGION: &str = "us-central1";
const DEFAULT_METRIC: &str = "MINIMIZE_MAE";
const DEFAULT_BUCKET: &str = "gs://a2ml";
const DEFAULT_POLL_SECS: u64 = 10;

/// Registry constructor.
pub fn create(settings: ProviderSettings) -> Result<Box<dyn Provider>> {
    Ok(Box::new(GoogleProvider::new(settings)?))
}

/// Training budget in minutes to the milli node hours AutoML expects.
pub fn milli_node_hours(minutes: u64) -> u64 {
    minutes.saturating_mul(1000) / 60
}

#[derive(Debug)]
pub struct GoogleProvider {
    settings: ProviderSettings,
    rest: RestClient,
    project: String,
    region: String,
    gsutil: String,
}

impl GoogleProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let endpoint = settings
            .own
            .get_str("endpoint")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let token = credentials::resolve_token(ProviderKind::Google.id(), TOKEN_ENV);
        let rest = RestClient::new(ProviderKind::Google.id(), endpoint, token)?;
        Self::with_client(settings, rest)
    }

    pub fn with_client(settings: ProviderSettings, rest: RestClient) -> Result<Self> {
        let project = settings.own.get_str("project").ok_or_else(|| {
            Error::configuration_with_context(
                "Google project is not set",
                ErrorContext::new()
                    .with_field_path("google/project")
                    .with_details("set `project` in google.yaml"),
            )
        })?;
        let region = settings
            .own
            .get_str("cluster/region")
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Ok(Self {
            settings,
            rest,
            project,
            region,
            gsutil: std::env::var("A2ML_GSUTIL_BIN").unwrap_or_else(|_| "gsutil".to_string()),
        })
    }

    pub fn location_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }

    pub fn dataset_path(&self, dataset_id: &str) -> String {
        format!("{}/datasets/{}", self.location_path(), dataset_id)
    }

    /// Full model path; ids that already are paths pass through.
    pub fn model_path(&self, model_id: &str) -> String {
        if model_id.starts_with("projects/") {
            model_id.to_string()
        } else {
            format!("{}/models/{}", self.location_path(), model_id)
        }
    }

    fn require_token(&self) -> Result<()> {
        if self.rest.has_token() {
            Ok(())
        } else {
            Err(Error::authentication(
                "google",
                format!("no access token: store one with `a2ml auth login` or set {}", TOKEN_ENV),
            ))
        }
    }

    fn require(&self, key: &str, hint: &str) -> Result<String> {
        self.settings.own.get_str(key).ok_or_else(|| {
            Error::configuration_with_context(
                format!("'{}' is not set", key),
                ErrorContext::new()
                    .with_field_path(format!("google/{}", key))
                    .with_details(hint.to_string()),
            )
        })
    }

    fn display_name(&self) -> String {
        // Display names allow letters, digits and underscores only.
        self.settings
            .name()
            .unwrap_or_else(|| "a2ml".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    fn poll_interval(&self) -> Result<Duration> {
        let secs = self
            .settings
            .own
            .get_or("poll_interval_secs", DEFAULT_POLL_SECS)?;
        Ok(Duration::from_secs(secs))
    }

    /// Copy a local file into the bucket; returns its `gs://` URI.
    async fn copy_to_bucket(&self, source: &Path) -> Result<String> {
        let bucket = self
            .settings
            .own
            .get_str("gsbucket")
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let bucket = bucket.trim_end_matches('/');
        info!(source = %source.display(), bucket, "copying data source to Google Storage");
        let status = tokio::process::Command::new(&self.gsutil)
            .arg("cp")
            .arg(source)
            .arg(bucket)
            .status()
            .await
            .map_err(|e| {
                Error::local_execution(format!("cannot start '{}': {}", self.gsutil, e), None)
            })?;
        if !status.success() {
            return Err(Error::local_execution(
                format!("copy of {} to {} failed", source.display(), bucket),
                status.code(),
            ));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("{}/{}", bucket, file_name))
    }

    async fn wait_for(&self, operation: &str) -> Result<Value> {
        let interval = self.poll_interval()?;
        loop {
            let status = self.rest.get(operation).await?;
            if status.get("done").and_then(Value::as_bool).unwrap_or(false) {
                return operation_result(status);
            }
            tracing::debug!(operation, "operation still running");
            tokio::time::sleep(interval).await;
        }
    }

    async fn column_specs(&self, dataset: &str) -> Result<Vec<Value>> {
        let tables = self.rest.get(&format!("{}/tableSpecs", dataset)).await?;
        let table_spec = tables
            .pointer("/tableSpecs/0/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote("not_found", format!("dataset {} has no tables", dataset)))?
            .to_string();
        info!(table_spec = table_spec.as_str(), "listing column specs");
        let columns = self
            .rest
            .get(&format!("{}/columnSpecs", table_spec))
            .await?;
        Ok(columns
            .get("columnSpecs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn model_for(&self, model_id: Option<&str>) -> Result<String> {
        match model_id {
            Some(id) => Ok(self.model_path(id)),
            None => self.require("model_name", "run `a2ml evaluate` after training completes"),
        }
    }

    /// Pick the prediction for one row.
    ///
    /// Without a threshold the top scoring result wins. With one, only results
    /// whose score reaches the threshold are considered.
    fn choose_prediction(response: &Value, threshold: Option<f64>) -> Option<String> {
        let results = response.get("payload").and_then(Value::as_array)?;
        results
            .iter()
            .filter_map(|r| r.get("tables"))
            .filter(|t| {
                let score = t.get("score").and_then(Value::as_f64);
                match (threshold, score) {
                    (Some(threshold), Some(score)) => score >= threshold,
                    _ => true,
                }
            })
            .max_by(|a, b| {
                let score = |t: &Value| t.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                score(*a)
                    .partial_cmp(&score(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .and_then(|t| t.get("value"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

/// `response` of a finished operation, or its `error` as a remote error.
fn operation_result(status: Value) -> Result<Value> {
    if let Some(error) = status.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("operation failed")
            .to_string();
        return Err(Error::remote("operation_failed", message));
    }
    Ok(status.get("response").cloned().unwrap_or(Value::Null))
}

fn column_name(column: &Value) -> Option<&str> {
    column.get("displayName").and_then(Value::as_str)
}

fn last_segment(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn import_data(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let mut source = self.settings.source().ok_or_else(|| {
            Error::configuration_with_context(
                "please specify a source (URL or local file)",
                ErrorContext::new().with_field_path("config/source"),
            )
        })?;

        info!(location = self.location_path().as_str(), "creating dataset");
        let dataset = self
            .rest
            .post(
                &format!("{}/datasets", self.location_path()),
                &json!({ "displayName": self.display_name(), "tablesDatasetMetadata": {} }),
            )
            .await?;
        let dataset_name = dataset
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote("invalid_response", "dataset response has no name"))?
            .to_string();
        let dataset_id = last_segment(&dataset_name).to_string();
        self.settings.own.set("dataset_id", dataset_id.as_str());
        self.settings.persist()?;
        info!(dataset = dataset_id.as_str(), "dataset created");

        if Path::new(&source).is_file() {
            source = self.copy_to_bucket(Path::new(&source)).await?;
        }
        let input_config = if source.starts_with("bq") {
            json!({ "bigquerySource": { "inputUri": source } })
        } else {
            let uris: Vec<&str> = source.split(',').map(str::trim).collect();
            json!({ "gcsSource": { "inputUris": uris } })
        };

        let operation = self
            .rest
            .post(
                &format!("{}:importData", dataset_name),
                &json!({ "inputConfig": input_config }),
            )
            .await?;
        let operation_name = operation
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote("invalid_response", "import returned no operation"))?
            .to_string();
        info!(operation = operation_name.as_str(), "waiting for import");
        self.wait_for(&operation_name).await?;
        info!(dataset = dataset_id.as_str(), "data imported");
        Ok(Outcome::Completed(Some(dataset_id)))
    }

    async fn train(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let dataset_id = self.require("dataset_id", "run `a2ml import` first")?;
        let target = self.settings.target().ok_or_else(|| {
            Error::configuration_with_context(
                "target is not set",
                ErrorContext::new().with_field_path("config/target"),
            )
        })?;
        let dataset = self.dataset_path(&dataset_id);
        let columns = self.column_specs(&dataset).await?;

        let target_spec = columns
            .iter()
            .find(|c| column_name(c) == Some(target.as_str()))
            .cloned()
            .ok_or_else(|| {
                Error::configuration_with_context(
                    format!("target column '{}' not found in dataset", target),
                    ErrorContext::new().with_field_path("config/target"),
                )
            })?;
        let target_id = target_spec
            .get("name")
            .and_then(Value::as_str)
            .map(last_segment)
            .unwrap_or_default()
            .to_string();

        self.rest
            .patch(
                &dataset,
                &[("updateMask", "tablesDatasetMetadata.targetColumnSpecId")],
                &json!({ "tablesDatasetMetadata": { "targetColumnSpecId": target_id } }),
            )
            .await?;

        let exclude = self.settings.exclude();
        for column in &exclude {
            if columns.iter().all(|c| column_name(c) != Some(column.as_str())) {
                warn!(column = column.as_str(), "excluded column not found in dataset");
            }
        }
        let features: Vec<Value> = columns
            .iter()
            .filter(|c| {
                column_name(c).map_or(false, |name| {
                    name != target && !exclude.iter().any(|e| e == name)
                })
            })
            .cloned()
            .collect();
        info!(features = features.len(), target = target.as_str(), "training model");

        let mut metadata = json!({
            "targetColumnSpec": target_spec,
            "inputFeatureColumnSpecs": features,
            "optimizationObjective": self
                .settings
                .own
                .get_str("experiment/metric")
                .unwrap_or_else(|| DEFAULT_METRIC.to_string()),
        });
        if let Some(minutes) = self.settings.budget()? {
            metadata["trainBudgetMilliNodeHours"] = json!(milli_node_hours(minutes).to_string());
        }

        let operation = self
            .rest
            .post(
                &format!("{}/models", self.location_path()),
                &json!({
                    "displayName": self.display_name(),
                    "datasetId": dataset_id,
                    "tablesModelMetadata": metadata,
                }),
            )
            .await?;
        let operation_name = operation
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote("invalid_response", "model creation returned no operation"))?
            .to_string();
        info!(operation = operation_name.as_str(), "training operation started");
        self.settings.own.set("operation_name", operation_name.as_str());
        self.settings.persist()?;
        Ok(Outcome::InProgress(operation_name))
    }

    async fn evaluate(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let operation_name = self.require("operation_name", "run `a2ml train` first")?;
        let status = self.rest.get(&operation_name).await?;
        if !status.get("done").and_then(Value::as_bool).unwrap_or(false) {
            info!(operation = operation_name.as_str(), "model still training");
            return Ok(Outcome::InProgress("model still training".to_string()));
        }

        let response = operation_result(status)?;
        let model_name = response
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote("invalid_response", "training operation has no model"))?
            .to_string();
        info!(model = model_name.as_str(), "model training complete");
        self.settings.own.set("model_name", model_name.as_str());
        self.settings.persist()?;

        let evaluations = self
            .rest
            .get(&format!("{}/modelEvaluations", model_name))
            .await?;
        for evaluation in evaluations
            .get("modelEvaluation")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let name = evaluation.get("name").and_then(Value::as_str).unwrap_or("");
            let examples = evaluation
                .get("evaluatedExampleCount")
                .cloned()
                .unwrap_or(Value::Null);
            let created = evaluation.get("createTime").and_then(Value::as_str).unwrap_or("");
            info!(
                evaluation = last_segment(name),
                examples = %examples,
                created,
                "model evaluation"
            );
            tracing::debug!(evaluation = %evaluation, "full model evaluation");
        }
        Ok(Outcome::Completed(Some(model_name)))
    }

    async fn deploy(&mut self, model_id: Option<&str>, locally: bool) -> Result<Outcome> {
        if locally {
            return Ok(Outcome::Unsupported);
        }
        self.require_token()?;
        let model = self.model_for(model_id)?;
        info!(model = model.as_str(), "deploying model");
        match self.rest.post(&format!("{}:deploy", model), &json!({})).await {
            Ok(_) => Ok(Outcome::Completed(Some(model))),
            Err(Error::RemoteService { class, message, .. }) if class == "failed_precondition" => {
                Err(Error::already_satisfied(format!(
                    "model is already deploying: {}",
                    message
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn predict(&mut self, request: &PredictRequest) -> Result<Outcome> {
        if request.locally {
            return Ok(Outcome::Unsupported);
        }
        self.require_token()?;
        let model = self.model_for(request.model_id.as_deref())?;
        let table = Table::read(&request.filename)?;
        let features = match self.settings.target() {
            Some(target) => table.without_column(&target),
            None => table,
        };
        let rows = features.numeric_rows()?;

        let mut predictions = Vec::with_capacity(rows.len());
        for row in rows {
            let values: Vec<Value> = row.into_iter().map(|v| json!(v)).collect();
            let response = self
                .rest
                .post(
                    &format!("{}:predict", model),
                    &json!({ "payload": { "row": { "values": values } } }),
                )
                .await?;
            let prediction = Self::choose_prediction(&response, request.threshold).unwrap_or_default();
            tracing::debug!(prediction = prediction.as_str(), "row predicted");
            predictions.push(prediction);
        }

        let column = self
            .settings
            .target()
            .unwrap_or_else(|| "prediction".to_string());
        let output = predicted_path(&request.filename);
        features.with_column(&column, &predictions)?.write(&output)?;
        info!(path = %output.display(), rows = predictions.len(), "predictions stored");
        Ok(Outcome::Written(output))
    }

    async fn review(&mut self) -> Result<Outcome> {
        self.require_token()?;
        let model_name = self.require("model_name", "run `a2ml evaluate` after training completes")?;
        let model = self.rest.get(&model_name).await?;
        let deployed = model.get("deploymentState").and_then(Value::as_str) == Some("DEPLOYED");
        let id = last_segment(model.get("name").and_then(Value::as_str).unwrap_or(&model_name));
        let display_name = model.get("displayName").and_then(Value::as_str).unwrap_or("");
        let created = model.get("createTime").and_then(Value::as_str).unwrap_or("");
        let metadata = model.get("tablesModelMetadata").cloned().unwrap_or(Value::Null);
        info!(
            model = model_name.as_str(),
            id,
            display_name,
            created,
            deployment_state = if deployed { "deployed" } else { "undeployed" },
            "model"
        );
        info!(metadata = %metadata, "model metadata");
        Ok(Outcome::Completed(Some(model_name)))
    }
}
