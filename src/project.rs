//! `a2ml new`: project directory scaffolding.

use crate::config::{Config, GENERAL_FILE};
use crate::error::ErrorContext;
use crate::providers::ProviderKind;
use crate::tabular::absolutize;
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

const NAME_PLACEHOLDER: &str = "PROJECT_NAME";

/// Remote source schemes stored as given.
pub const REMOTE_SCHEMES: [&str; 5] = ["http", "https", "s3", "gs", "bq"];

const TEMPLATES: [(&str, &str); 4] = [
    (GENERAL_FILE, include_str!("../templates/config.yaml")),
    ("auger.yaml", include_str!("../templates/auger.yaml")),
    ("google.yaml", include_str!("../templates/google.yaml")),
    ("azure.yaml", include_str!("../templates/azure.yaml")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelType {
    #[default]
    Classification,
    Regression,
    Timeseries,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Classification => "classification",
            ModelType::Regression => "regression",
            ModelType::Timeseries => "timeseries",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider list given to `new`: `all` or comma separated names.
pub fn parse_providers(value: &str) -> Result<Vec<ProviderKind>> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(ProviderKind::ALL.to_vec());
    }
    let mut kinds = Vec::new();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let kind = ProviderKind::from_str(name)?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(Error::configuration("at least one provider is required"));
    }
    Ok(kinds)
}

/// Normalize a data source.
///
/// Remote URLs with a known scheme are returned unchanged; local files must
/// exist and are returned as absolute paths.
pub fn verify_source(source: &str) -> Result<String> {
    if let Ok(url) = Url::parse(source) {
        // Single letter schemes are Windows drive letters.
        if url.scheme().len() > 1 {
            if REMOTE_SCHEMES.contains(&url.scheme()) {
                return Ok(source.to_string());
            }
            return Err(Error::configuration_with_context(
                format!("unsupported data source scheme '{}'", url.scheme()),
                ErrorContext::new()
                    .with_field_path("config/source")
                    .with_details(format!("supported: {}", REMOTE_SCHEMES.join(", "))),
            ));
        }
    }

    let path = Path::new(source);
    if !path.is_file() {
        return Err(Error::configuration_with_context(
            format!("can't find data source file {}", source),
            ErrorContext::new().with_field_path("config/source"),
        ));
    }
    Ok(absolutize(path)?.display().to_string())
}

/// Parameters of a new project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub providers: Vec<ProviderKind>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub model_type: ModelType,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: vec![ProviderKind::Auger],
            source: None,
            target: None,
            model_type: ModelType::default(),
        }
    }

    /// Create the project folder under `parent` and write its configuration.
    pub fn create(&self, parent: &Path) -> Result<PathBuf> {
        if self.name.trim().is_empty() || self.name.contains(['/', '\\']) {
            return Err(Error::configuration(format!(
                "invalid project name '{}'",
                self.name
            )));
        }
        let source = self.source.as_deref().map(verify_source).transpose()?;

        let project_path = absolutize(parent.join(&self.name))?;
        if let Err(e) = std::fs::create_dir_all(parent).and_then(|_| std::fs::create_dir(&project_path)) {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(Error::configuration(format!(
                    "can't create '{}': folder already exists",
                    self.name
                )));
            }
            return Err(e.into());
        }
        tracing::info!(project = self.name.as_str(), "created project folder");

        for (file, template) in TEMPLATES {
            std::fs::write(
                project_path.join(file),
                template.replace(NAME_PLACEHOLDER, &self.name),
            )?;
        }

        let mut config = Config::load(&project_path)?;
        config.set_providers(&self.providers);
        let general = config.general_mut();
        general.set("name", self.name.as_str());
        general.set("source", source.clone().unwrap_or_default());
        general.set("target", self.target.clone().unwrap_or_default());
        general.set("model_type", self.model_type.as_str());
        general.write()?;

        let auger = config.section_mut(ProviderKind::Auger);
        auger.set("project/name", self.name.as_str());
        if let Some(target) = &self.target {
            auger.set("experiment/target", target.as_str());
        }
        auger.set("experiment/model_type", self.model_type.as_str());
        auger.write()?;

        tracing::info!(
            "to build your model, please do: cd {} && a2ml import && a2ml train",
            self.name
        );
        Ok(project_path)
    }
}
