//! Auger.AI hub REST API.
//!
//! Every hub response wraps its payload in `{"data": ...}`.

use crate::tabular::Table;
use crate::transport::RestClient;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::path::Path;

/// Hub endpoint used when `auger.yaml` has no `endpoint`.
pub const DEFAULT_ENDPOINT: &str = "https://app.auger.ai";

#[derive(Debug, Clone)]
pub struct HubApi {
    rest: RestClient,
}

impl HubApi {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        let base = format!("{}/api/v1", endpoint.trim_end_matches('/'));
        Ok(Self {
            rest: RestClient::new("auger", base, token)?,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.rest.has_token()
    }

    /// Exchange credentials for an API token and check the organization exists.
    pub async fn login(&mut self, email: &str, password: &str, organization: &str) -> Result<String> {
        let res = self
            .rest
            .post("tokens", &json!({ "email": email, "password": password }))
            .await?;
        let token = data(res)?
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::authentication("auger", "hub returned no token"))?;
        self.rest.set_token(token.clone());

        let orgs = data(
            self.rest
                .get_query("organizations", &[("name", organization)])
                .await?,
        )?;
        if first(&orgs).is_none() {
            return Err(Error::authentication(
                "auger",
                format!("Auger Organization {} doesn't exist", organization),
            ));
        }
        Ok(token)
    }

    pub async fn find_project(&self, name: &str) -> Result<Option<String>> {
        let projects = data(self.rest.get_query("projects", &[("name", name)]).await?)?;
        first(&projects).map(id_of).transpose()
    }

    pub async fn create_project(&self, name: &str) -> Result<String> {
        let project = data(self.rest.post("projects", &json!({ "name": name })).await?)?;
        id_of(&project)
    }

    /// Upload a local file; returns the storage URL the hub assigned.
    pub async fn upload_file(&self, project_id: &str, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data.csv".to_string());
        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("project_id", project_id.to_string())
            .part("file", part);
        let uploaded = data(self.rest.post_multipart("project_files/upload", form).await?)?;
        uploaded
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| unexpected("upload response has no url"))
    }

    pub async fn create_project_file(&self, project_id: &str, name: &str, url: &str) -> Result<String> {
        let file = data(
            self.rest
                .post(
                    "project_files",
                    &json!({ "project_id": project_id, "name": name, "url": url }),
                )
                .await?,
        )?;
        id_of(&file)
    }

    pub async fn create_experiment(&self, project_id: &str, project_file_id: &str, name: &str) -> Result<String> {
        let experiment = data(
            self.rest
                .post(
                    "experiments",
                    &json!({
                        "project_id": project_id,
                        "project_file_id": project_file_id,
                        "name": name,
                    }),
                )
                .await?,
        )?;
        id_of(&experiment)
    }

    pub async fn start_session(&self, experiment_id: &str, model_settings: &Value) -> Result<String> {
        let session = data(
            self.rest
                .post(
                    "experiment_sessions",
                    &json!({ "experiment_id": experiment_id, "model_settings": model_settings, "start": true }),
                )
                .await?,
        )?;
        id_of(&session)
    }

    pub async fn session(&self, session_id: &str) -> Result<Value> {
        data(self.rest.get(&format!("experiment_sessions/{}", session_id)).await?)
    }

    /// Trials of a session, best score first.
    pub async fn leaderboard(&self, session_id: &str, limit: usize) -> Result<Vec<Value>> {
        let limit = limit.to_string();
        let trials = data(
            self.rest
                .get_query(
                    "trials",
                    &[("experiment_session_id", session_id), ("limit", limit.as_str())],
                )
                .await?,
        )?;
        let mut trials = trials.as_array().cloned().unwrap_or_default();
        trials.sort_by(|a, b| {
            let score = |t: &Value| t.get("score").and_then(Value::as_f64).unwrap_or(f64::MIN);
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(trials)
    }

    pub async fn create_pipeline(&self, trial_id: &str) -> Result<String> {
        let pipeline = data(self.rest.post("pipelines", &json!({ "trial_id": trial_id })).await?)?;
        id_of(&pipeline)
    }

    pub async fn pipeline(&self, pipeline_id: &str) -> Result<Value> {
        data(self.rest.get(&format!("pipelines/{}", pipeline_id)).await?)
    }

    /// Download the exported model of a trial as a zip archive.
    pub async fn download_export(&self, trial_id: &str, dest: &Path) -> Result<u64> {
        self.rest
            .download(&format!("trials/{}/export", trial_id), dest)
            .await
    }

    /// One prediction per row of `table`, in row order.
    pub async fn predict(&self, pipeline_id: &str, table: &Table, threshold: Option<f64>) -> Result<Vec<String>> {
        let mut body = json!({ "columns": table.headers, "data": table.rows });
        if let Some(threshold) = threshold {
            body["threshold"] = json!(threshold);
        }
        let result = data(
            self.rest
                .post(&format!("pipelines/{}/predict", pipeline_id), &body)
                .await?,
        )?;
        let predictions = result
            .get("predictions")
            .and_then(Value::as_array)
            .ok_or_else(|| unexpected("prediction response has no predictions"))?;
        Ok(predictions.iter().map(scalar_to_string).collect())
    }
}

fn data(mut response: Value) -> Result<Value> {
    match response.get_mut("data") {
        Some(v) => Ok(v.take()),
        None => Err(unexpected("response has no data")),
    }
}

fn first(list: &Value) -> Option<&Value> {
    list.as_array().and_then(|items| items.first())
}

/// Hub ids are numeric; accept strings too.
fn id_of(item: &Value) -> Result<String> {
    match item.get("id") {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(unexpected("item has no id")),
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unexpected(message: &str) -> Error {
    Error::remote("invalid_response", message)
}
