//! Containerized worker invocation.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Worker image; the tag comes from the provider's cluster settings.
pub const WORKER_IMAGE: &str = "deeplearninc/auger-ml-worker";
/// Container path the exported model directory is mounted at.
pub const MODEL_MOUNT: &str = "/var/src/auger-ml-worker/exported_model";
/// Container path the data directory is mounted at.
pub const DATA_MOUNT: &str = "/var/src/auger-ml-worker/model_data";

/// One run of the prediction worker: two bind mounts plus process arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerInvocation {
    pub image: String,
    pub model_dir: PathBuf,
    pub data_dir: PathBuf,
    pub args: Vec<String>,
}

impl WorkerInvocation {
    /// `input` must be an absolute path to the file to score.
    pub fn new(tag: &str, model_dir: &Path, input: &Path, threshold: Option<f64>) -> Result<Self> {
        let (Some(data_dir), Some(file_name)) = (input.parent(), input.file_name()) else {
            return Err(Error::local_execution(
                format!("cannot mount input path {}", input.display()),
                None,
            ));
        };

        let mut args = vec![format!(
            "--path_to_predict=./model_data/{}",
            file_name.to_string_lossy()
        )];
        if let Some(threshold) = threshold {
            args.push(format!("--threshold={}", threshold));
        }

        Ok(Self {
            image: format!("{}:{}", WORKER_IMAGE, tag),
            model_dir: model_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            args,
        })
    }

    /// Full `docker` argument vector.
    pub fn docker_args(&self) -> Vec<String> {
        let mut argv = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", self.model_dir.display(), MODEL_MOUNT),
            "-v".to_string(),
            format!("{}:{}", self.data_dir.display(), DATA_MOUNT),
            self.image.clone(),
            "python".to_string(),
            "./exported_model/client.py".to_string(),
        ];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Something that can run the worker and report its exit code.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(&self, invocation: &WorkerInvocation) -> Result<i32>;
}

/// Runs the worker with the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    program: String,
}

impl DockerRunner {
    pub fn new() -> Self {
        Self {
            program: std::env::var("A2ML_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(&self, invocation: &WorkerInvocation) -> Result<i32> {
        tracing::info!(image = invocation.image.as_str(), "running model in worker container");
        let status = tokio::process::Command::new(&self.program)
            .args(invocation.docker_args())
            .status()
            .await
            .map_err(|e| {
                Error::local_execution(format!("cannot start '{}': {}", self.program, e), None)
            })?;
        // Killed by a signal: no exit code.
        Ok(status.code().unwrap_or(-1))
    }
}
