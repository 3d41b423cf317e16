//! A single YAML configuration file with slash-separated key lookup.

use crate::error::ErrorContext;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// One named configuration section (`config`, `auger`, `google`, ...).
///
/// Keys use `/` to address nested mappings, so `experiment/metric` reads
/// `experiment: { metric: ... }`. A flat key literally named `experiment/metric`
/// is honored as a fallback.
#[derive(Debug, Clone)]
pub struct ConfigSection {
    name: String,
    path: Option<PathBuf>,
    yaml: Mapping,
}

impl ConfigSection {
    /// Create an empty section that is not backed by a file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            yaml: Mapping::new(),
        }
    }

    /// Parse a section from YAML text (not backed by a file).
    pub fn from_yaml_str(name: impl Into<String>, text: &str) -> Result<Self> {
        let name = name.into();
        let yaml = parse_mapping(&name, text)?;
        Ok(Self {
            name,
            path: None,
            yaml,
        })
    }

    /// Load a section from `path`. A missing file yields an empty section that
    /// will be created on the first [`write`](Self::write).
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();
        let yaml = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            parse_mapping(&name, &text)?
        } else {
            Mapping::new()
        };
        Ok(Self {
            name,
            path: Some(path),
            yaml,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mapping(&self) -> &Mapping {
        &self.yaml
    }

    /// Look up a raw value. Null and empty-string values read as unset.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.get_nested(key)
            .or_else(|| self.yaml.get(key))
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
    }

    fn get_nested(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('/');
        let mut current = self.yaml.get(parts.next()?)?;
        for part in parts {
            current = current.as_mapping()?.get(part)?;
        }
        Some(current)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Scalar value rendered as a string (numbers and booleans included).
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Typed lookup. A present value of the wrong shape is a configuration error.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_yaml::from_value(value.clone()).map(Some).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid value for '{}'", key),
                    ErrorContext::new()
                        .with_field_path(format!("{}/{}", self.name, key))
                        .with_details(e.to_string())
                        .with_source("config_store"),
                )
            }),
        }
    }

    /// Typed lookup with a default for absent keys.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get_as(key)?.unwrap_or(default))
    }

    /// Required string value.
    pub fn require_str(&self, key: &str) -> Result<String> {
        self.get_str(key).ok_or_else(|| {
            Error::configuration_with_context(
                format!("'{}' is not set", key),
                ErrorContext::new()
                    .with_field_path(format!("{}/{}", self.name, key))
                    .with_source("config_store"),
            )
        })
    }

    /// Set a value, creating intermediate mappings along the key path.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let parts: Vec<&str> = key.split('/').collect();
        let mut map = &mut self.yaml;
        for part in &parts[..parts.len() - 1] {
            let entry = map
                .entry(Value::String(part.to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !entry.is_mapping() {
                *entry = Value::Mapping(Mapping::new());
            }
            map = match entry {
                Value::Mapping(m) => m,
                _ => unreachable!("entry was just replaced with a mapping"),
            };
        }
        map.insert(Value::String(parts[parts.len() - 1].to_string()), value.into());
    }

    /// Persist to the backing file. In-memory sections are left untouched.
    pub fn write(&self) -> Result<()> {
        let Some(path) = &self.path else {
            tracing::debug!(section = self.name.as_str(), "section has no backing file, skipping write");
            return Ok(());
        };
        let text = serde_yaml::to_string(&self.yaml)?;
        std::fs::write(path, text)?;
        tracing::debug!(section = self.name.as_str(), path = %path.display(), "configuration written");
        Ok(())
    }
}

fn parse_mapping(name: &str, text: &str) -> Result<Mapping> {
    if text.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        _ => Err(Error::configuration_with_context(
            "configuration file must contain a mapping",
            ErrorContext::new()
                .with_field_path(name.to_string())
                .with_source("config_store"),
        )),
    }
}
