//! Project configuration store.
//!
//! A project directory contains `config.yaml` (settings shared by every provider)
//! and one YAML file per provider (`auger.yaml`, `google.yaml`, `azure.yaml`).
//! The store is loaded once and handed to the facade explicitly; each adapter
//! receives its own [`ProviderSettings`] copy and only ever writes back its own
//! provider file.

pub mod section;

pub use section::ConfigSection;

use crate::error::ErrorContext;
use crate::providers::ProviderKind;
use crate::{Error, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the section shared by all providers.
pub const GENERAL_SECTION: &str = "config";

/// File holding the general section inside a project directory.
pub const GENERAL_FILE: &str = "config.yaml";

#[derive(Debug, Clone)]
pub struct Config {
    root: Option<PathBuf>,
    general: ConfigSection,
    providers: BTreeMap<ProviderKind, ConfigSection>,
}

impl Config {
    /// Load the configuration of the project rooted at `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        let general_path = root.join(GENERAL_FILE);
        if !general_path.exists() {
            return Err(Error::configuration_with_context(
                format!("{} is not an a2ml project", root.display()),
                ErrorContext::new()
                    .with_field_path(GENERAL_FILE)
                    .with_details("run `a2ml new <project>` first"),
            ));
        }
        let general = ConfigSection::load(GENERAL_SECTION, &general_path)?;
        let mut providers = BTreeMap::new();
        for kind in ProviderKind::ALL {
            let section = ConfigSection::load(kind.id(), root.join(kind.config_file()))?;
            providers.insert(kind, section);
        }
        tracing::debug!(root = %root.display(), "configuration loaded");
        Ok(Self {
            root: Some(root),
            general,
            providers,
        })
    }

    /// An empty configuration that is not backed by files.
    pub fn in_memory() -> Self {
        let providers = ProviderKind::ALL
            .into_iter()
            .map(|kind| (kind, ConfigSection::new(kind.id())))
            .collect();
        Self {
            root: None,
            general: ConfigSection::new(GENERAL_SECTION),
            providers,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn general(&self) -> &ConfigSection {
        &self.general
    }

    pub fn general_mut(&mut self) -> &mut ConfigSection {
        &mut self.general
    }

    pub fn section(&self, kind: ProviderKind) -> &ConfigSection {
        &self.providers[&kind]
    }

    pub fn section_mut(&mut self, kind: ProviderKind) -> &mut ConfigSection {
        self.providers
            .entry(kind)
            .or_insert_with(|| ConfigSection::new(kind.id()))
    }

    /// Replace the provider selection for this run (e.g. from `--provider`).
    pub fn set_providers(&mut self, kinds: &[ProviderKind]) {
        let ids: Vec<Value> = kinds.iter().map(|k| Value::from(k.id())).collect();
        self.general.set("providers", Value::Sequence(ids));
    }

    /// Resolve the ordered, duplicate-free provider selection.
    ///
    /// Accepts a single name, a comma separated list, a YAML list, or `all`.
    pub fn provider_selection(&self) -> Result<Vec<ProviderKind>> {
        let names: Vec<String> = match self.general.get("providers") {
            None => Vec::new(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Error::configuration_with_context(
                        "provider names must be strings",
                        ErrorContext::new()
                            .with_field_path("config/providers")
                            .with_details(format!("{:?}", other)),
                    )),
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(Error::configuration_with_context(
                    "providers must be a name or a list of names",
                    ErrorContext::new()
                        .with_field_path("config/providers")
                        .with_details(format!("{:?}", other)),
                ))
            }
        };

        let mut selection: Vec<ProviderKind> = Vec::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let kinds = if name.eq_ignore_ascii_case("all") {
                ProviderKind::ALL.to_vec()
            } else {
                vec![name.parse::<ProviderKind>()?]
            };
            for kind in kinds {
                if selection.contains(&kind) {
                    tracing::warn!(provider = %kind, "provider listed more than once, ignoring duplicate");
                } else {
                    selection.push(kind);
                }
            }
        }

        if selection.is_empty() {
            return Err(Error::configuration_with_context(
                "no providers configured",
                ErrorContext::new()
                    .with_field_path("config/providers")
                    .with_details("set `providers` in config.yaml or pass --provider"),
            ));
        }
        Ok(selection)
    }

    /// Settings handed to one adapter: the shared section plus its own.
    pub fn settings_for(&self, kind: ProviderKind) -> ProviderSettings {
        ProviderSettings {
            kind,
            root: self.root.clone(),
            general: self.general.clone(),
            own: self
                .providers
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| ConfigSection::new(kind.id())),
        }
    }
}

/// Configuration slice owned by a single adapter.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Project directory, if the configuration was loaded from disk.
    pub root: Option<PathBuf>,
    pub general: ConfigSection,
    pub own: ConfigSection,
}

impl ProviderSettings {
    /// Settings with empty sections, not backed by files.
    pub fn in_memory(kind: ProviderKind) -> Self {
        Config::in_memory().settings_for(kind)
    }

    pub fn name(&self) -> Option<String> {
        self.general.get_str("name")
    }

    pub fn source(&self) -> Option<String> {
        self.general.get_str("source").filter(|s| !s.is_empty())
    }

    pub fn target(&self) -> Option<String> {
        self.general.get_str("target").filter(|s| !s.is_empty())
    }

    /// Columns excluded from training (`exclude: a,b` or a YAML list).
    pub fn exclude(&self) -> Vec<String> {
        match self.general.get("exclude") {
            Some(Value::String(s)) => s
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Training budget in minutes.
    pub fn budget(&self) -> Result<Option<u64>> {
        self.general.get_as("budget")
    }

    pub fn model_type(&self) -> String {
        self.general
            .get_str("model_type")
            .unwrap_or_else(|| "classification".to_string())
    }

    /// Resolve a project-relative path.
    pub fn project_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        match &self.root {
            Some(root) => root.join(relative),
            None => relative.as_ref().to_path_buf(),
        }
    }

    /// Persist the adapter's own section.
    pub fn persist(&self) -> Result<()> {
        self.own.write()
    }
}
