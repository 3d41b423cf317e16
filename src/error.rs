use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for configuration and data errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or data location that caused the error (e.g., "google/project", "row 3, column 2")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_store", "google_adapter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for a2ml.
///
/// The first five variants form the user-facing taxonomy; the rest wrap
/// low-level failures from the libraries underneath.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Authentication error ({provider}): {message}")]
    Authentication { provider: String, message: String },

    #[error("Remote service error{}: {class}: {message}", format_status(.status))]
    RemoteService {
        status: Option<u16>,
        class: String,
        message: String,
        /// "already exists" / "already in progress": the requested state is (or will be) reached.
        already_satisfied: bool,
    },

    #[error("Local execution error: {message}{}", format_exit_code(.exit_code))]
    LocalExecution {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Data format error: {message}{}", format_context(.context))]
    DataFormat {
        message: String,
        context: ErrorContext,
    },

    #[error("{operation} failed for {} provider(s): {}", .failures.len(), format_failures(.failures))]
    Dispatch {
        operation: String,
        failures: Vec<(String, String)>,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Model archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn format_exit_code(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit code {})", c)).unwrap_or_default()
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(provider, message)| format!("{}: {}", provider, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn authentication(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Authentication {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    pub fn remote(class: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::RemoteService {
            status: None,
            class: class.into(),
            message: msg.into(),
            already_satisfied: false,
        }
    }

    /// A remote conflict meaning the requested state already holds (e.g. "already deploying").
    pub fn already_satisfied(msg: impl Into<String>) -> Self {
        Error::RemoteService {
            status: None,
            class: "conflict".to_string(),
            message: msg.into(),
            already_satisfied: true,
        }
    }

    pub fn local_execution(msg: impl Into<String>, exit_code: Option<i32>) -> Self {
        Error::LocalExecution {
            message: msg.into(),
            exit_code,
        }
    }

    /// Create a new data format error with structured context
    pub fn data_format_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::DataFormat {
            message: msg.into(),
            context,
        }
    }

    /// Whether this error reports a remote state that already satisfies the request.
    pub fn is_already_satisfied(&self) -> bool {
        matches!(
            self,
            Error::RemoteService {
                already_satisfied: true,
                ..
            }
        )
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::DataFormat { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
