//! Command-line surface of the `a2ml` binary.

use crate::config::{Config, ConfigSection};
use crate::facade::{A2ml, DispatchReport, Operation};
use crate::project::{parse_providers, ModelType, NewProject};
use crate::providers::auger::{self, HubApi};
use crate::providers::{PredictRequest, ProviderKind};
use crate::transport::credentials;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Automate AutoML across Auger.AI, Google Cloud AutoML and Azure AutoML.
#[derive(Parser, Debug)]
#[command(name = "a2ml", version, about = "Automate AutoML across providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Project directory (defaults to the current directory).
    #[arg(long, short = 'd', global = true, env = "A2ML_PROJECT_DIR")]
    pub dir: Option<PathBuf>,

    /// Override the configured providers (comma separated, or `all`).
    #[arg(long = "provider", id = "provider_override", global = true)]
    pub provider_override: Option<String>,

    /// Debug logging.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new project.
    New {
        /// Project (and folder) name.
        project: String,
        /// Providers to enable: `all` or a comma separated list.
        #[arg(long, short = 'p', default_value = "auger")]
        providers: String,
        /// Data source: local file or remote URL.
        #[arg(long, short = 's')]
        source: Option<String>,
        /// Target column in the data source.
        #[arg(long, short = 't')]
        target: Option<String>,
        #[arg(long, value_enum, default_value_t = ModelType::Classification)]
        model_type: ModelType,
    },
    /// Import the data source into every provider.
    Import,
    /// Start training.
    Train,
    /// Show training progress and the leaderboard.
    Evaluate,
    /// Deploy a trained model.
    Deploy {
        #[arg(long, short = 'm')]
        model_id: Option<String>,
        /// Download the model for local predictions instead of deploying it.
        #[arg(long, short = 'l')]
        locally: bool,
    },
    /// Predict the target for every row of a CSV file.
    Predict {
        filename: PathBuf,
        #[arg(long, short = 'm')]
        model_id: Option<String>,
        #[arg(long, short = 't')]
        threshold: Option<f64>,
        /// Run the downloaded model locally.
        #[arg(long, short = 'l')]
        locally: bool,
    },
    /// Show deployed model details.
    Review,
    /// Manage provider credentials.
    Auth {
        #[command(subcommand)]
        action: AuthCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store provider credentials in the OS keyring.
    Login {
        #[arg(value_parser = parse_provider)]
        provider: ProviderKind,
        /// Access token (Google, Azure, or an existing Auger token).
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "AUGER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        organization: Option<String>,
    },
    /// Remove stored credentials.
    Logout {
        #[arg(value_parser = parse_provider)]
        provider: ProviderKind,
    },
}

fn parse_provider(value: &str) -> std::result::Result<ProviderKind, String> {
    value.parse().map_err(|e: crate::Error| e.to_string())
}

impl Command {
    /// Facade operation for dispatching commands.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Command::Import => Some(Operation::ImportData),
            Command::Train => Some(Operation::Train),
            Command::Evaluate => Some(Operation::Evaluate),
            Command::Deploy { model_id, locally } => Some(Operation::Deploy {
                model_id: model_id.clone(),
                locally: *locally,
            }),
            Command::Predict {
                filename,
                model_id,
                threshold,
                locally,
            } => Some(Operation::Predict(PredictRequest {
                filename: filename.clone(),
                model_id: model_id.clone(),
                threshold: *threshold,
                locally: *locally,
            })),
            Command::Review => Some(Operation::Review),
            Command::New { .. } | Command::Auth { .. } => None,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("cannot read current directory")?,
        };

        if let Some(operation) = self.command.operation() {
            let mut config = Config::load(&dir)?;
            if let Some(providers) = &self.provider_override {
                config.set_providers(&parse_providers(providers)?);
            }
            let mut a2ml = A2ml::new(&config)?;
            let report = a2ml.dispatch(operation).await;
            print_report(&report);
            report.into_result()?;
            return Ok(());
        }

        match self.command {
            Command::New {
                project,
                providers,
                source,
                target,
                model_type,
            } => {
                let path = NewProject {
                    name: project,
                    providers: parse_providers(&providers)?,
                    source,
                    target,
                    model_type,
                }
                .create(&dir)?;
                println!("{}", path.display());
                Ok(())
            }
            Command::Auth { action } => auth(action, &dir).await,
            _ => Ok(()),
        }
    }
}

fn print_report(report: &DispatchReport) {
    for entry in report.iter() {
        match &entry.result {
            Ok(outcome) => println!("{}: {}", entry.provider, outcome),
            Err(err) => println!("{}: failed: {}", entry.provider, err),
        }
    }
}

async fn auth(action: AuthCommand, dir: &std::path::Path) -> Result<()> {
    match action {
        AuthCommand::Login {
            provider,
            token: Some(token),
            ..
        } => {
            credentials::store_token(provider.id(), &token)?;
            println!("{}: token stored", provider);
        }
        AuthCommand::Login {
            provider: ProviderKind::Auger,
            token: None,
            email,
            password,
            organization,
        } => {
            let (Some(email), Some(password), Some(organization)) = (email, password, organization)
            else {
                bail!("auger login needs --email, --password and --organization (or --token)");
            };
            let endpoint = ConfigSection::load("auger", dir.join(ProviderKind::Auger.config_file()))?
                .get_str("endpoint")
                .unwrap_or_else(|| auger::hub::DEFAULT_ENDPOINT.to_string());
            let mut hub = HubApi::new(&endpoint, None)?;
            let token = hub.login(&email, &password, &organization).await?;
            credentials::store_token(ProviderKind::Auger.id(), &token)?;
            println!("auger: logged in to {} as {}", organization, email);
        }
        AuthCommand::Login { provider, .. } => {
            bail!("{} login needs --token", provider);
        }
        AuthCommand::Logout { provider } => {
            credentials::delete_token(provider.id())?;
            println!("{}: logged out", provider);
        }
    }
    Ok(())
}
