//! # a2ml
//!
//! Automate AutoML: one command surface over several AutoML back ends.
//!
//! ## Overview
//!
//! A project directory holds a shared `config.yaml` and one YAML file per
//! provider. The [`A2ml`] facade reads which providers are selected, builds
//! one adapter per provider through the [`ProviderRegistry`], and runs each of
//! the six operations (import, train, evaluate, deploy, predict, review) on
//! every adapter in selection order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a2ml::{A2ml, Config};
//!
//! #[tokio::main]
//! async fn main() -> a2ml::Result<()> {
//!     let config = Config::load("my-project")?;
//!     let mut a2ml = A2ml::new(&config)?;
//!
//!     a2ml.import_data().await.into_result()?;
//!     a2ml.train().await.into_result()?;
//!
//!     let report = a2ml.evaluate().await;
//!     for entry in report.iter() {
//!         println!("{}: {:?}", entry.provider, entry.result);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Project configuration store and provider selection |
//! | [`facade`] | Multi-provider dispatch and per-provider reports |
//! | [`providers`] | Provider trait, registry and the Auger, Google and Azure adapters |
//! | [`local`] | Local prediction inside the worker container |
//! | [`transport`] | REST client, error classification and credentials |
//! | [`tabular`] | CSV helpers |
//! | [`project`] | `new` project scaffolding |
//! | [`cmd`] | Command-line interface |

pub mod cmd;
pub mod config;
pub mod facade;
pub mod local;
pub mod project;
pub mod providers;
pub mod tabular;
pub mod transport;

pub use config::{Config, ConfigSection, ProviderSettings};
pub use facade::{A2ml, DispatchReport, Operation, ProviderReport};
pub use providers::{Outcome, PredictRequest, Provider, ProviderKind, ProviderRegistry};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
