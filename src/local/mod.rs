//! Local prediction: run an exported model inside the worker container.
//!
//! The exported model is a zip archive downloaded by `deploy --locally`. It is
//! unpacked next to the archive (`export_<id>.zip` → `export_<id>/`), mounted
//! into the container together with the input's directory, and removed again
//! afterwards unless it was already unpacked before the call.

pub mod docker;

pub use docker::{ContainerRunner, DockerRunner, WorkerInvocation};

use crate::error::ErrorContext;
use crate::tabular::{absolutize, predicted_path};
use crate::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Runs predictions through a [`ContainerRunner`].
#[derive(Debug, Clone)]
pub struct LocalPredictor<R = DockerRunner> {
    runner: R,
    image_tag: String,
}

impl<R: ContainerRunner> LocalPredictor<R> {
    pub fn new(runner: R, image_tag: impl Into<String>) -> Self {
        Self {
            runner,
            image_tag: image_tag.into(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Score `input` with the model packaged in `archive`.
    ///
    /// Returns the path of `<stem>_predicted.csv` written by the worker.
    pub async fn predict(
        &self,
        archive: &Path,
        input: &Path,
        threshold: Option<f64>,
    ) -> Result<PathBuf> {
        let archive = absolutize(archive)?;
        let input = absolutize(input)?;

        if !archive.is_file() {
            return Err(Error::configuration_with_context(
                "model isn't available locally",
                ErrorContext::new()
                    .with_field_path(archive.display().to_string())
                    .with_details("use `a2ml deploy --locally` to download the model"),
            ));
        }
        if !input.is_file() {
            return Err(Error::data_format_with_context(
                "input file not found",
                ErrorContext::new().with_field_path(input.display().to_string()),
            ));
        }

        let model = ExtractedModel::prepare(&archive)?;
        let output = predicted_path(&input);
        let output_existed = output.exists();

        let invocation =
            WorkerInvocation::new(&self.image_tag, model.path(), &input, threshold)?;
        tracing::debug!(args = ?invocation.docker_args(), "worker invocation");

        let code = self.runner.run(&invocation).await?;
        if code != 0 {
            if !output_existed {
                let _ = std::fs::remove_file(&output);
            }
            return Err(Error::local_execution(
                format!("worker container failed for {}", input.display()),
                Some(code),
            ));
        }
        if !output.is_file() {
            return Err(Error::local_execution(
                format!("worker did not produce {}", output.display()),
                Some(code),
            ));
        }
        Ok(output)
    }
}

/// Unpacked model directory; removed on drop if this invocation created it.
#[derive(Debug)]
struct ExtractedModel {
    path: PathBuf,
    created: bool,
}

impl ExtractedModel {
    fn prepare(archive: &Path) -> Result<Self> {
        let path = archive.with_extension("");
        if path.exists() {
            tracing::debug!(path = %path.display(), "using previously unpacked model");
            return Ok(Self {
                path,
                created: false,
            });
        }

        // Guard first so a failed extraction is cleaned up too.
        let guard = Self {
            path,
            created: true,
        };
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        zip.extract(&guard.path)?;
        tracing::debug!(path = %guard.path.display(), "model unpacked");
        Ok(guard)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExtractedModel {
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot remove unpacked model");
            }
        }
    }
}
