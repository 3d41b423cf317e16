use crate::error::ErrorContext;
use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Closed set of supported AutoML back ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    Auger,
    Google,
    Azure,
}

impl ProviderKind {
    /// Every known provider, in the order `all` expands to.
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Auger, ProviderKind::Google, ProviderKind::Azure];

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Auger => "auger",
            ProviderKind::Google => "google",
            ProviderKind::Azure => "azure",
        }
    }

    /// Name of the per-provider configuration file inside a project.
    pub fn config_file(&self) -> String {
        format!("{}.yaml", self.id())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auger" => Ok(ProviderKind::Auger),
            "google" => Ok(ProviderKind::Google),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(Error::configuration_with_context(
                format!("unknown provider '{}'", other),
                ErrorContext::new()
                    .with_field_path("config/providers")
                    .with_details("expected one of: auger, google, azure"),
            )),
        }
    }
}
