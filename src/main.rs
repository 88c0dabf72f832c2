use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use adaptive_alerting::commands::{self, Action, EXIT_FAILURE};
use adaptive_alerting::config::Settings;
use adaptive_alerting::modelservice::HttpModelService;

#[derive(Parser)]
#[command(
    name = "adaptive-alerting",
    about = "Creates, trains, disables and deletes Adaptive Alerting detectors from JSON metric configuration",
    version,
    long_about = None
)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model service base URL
    #[arg(long, global = true)]
    model_service_url: Option<String>,

    /// User recorded on created detector mappings
    #[arg(long, global = true)]
    model_service_user: Option<String>,

    /// Default datasource URL for metrics without their own datasource
    #[arg(long, global = true)]
    datasource_url: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build new detectors for each metric
    Build {
        /// One or more metric configuration files
        #[arg(required = true)]
        config_files: Vec<PathBuf>,
    },

    /// Retrain existing detectors whose training interval has elapsed
    Train {
        #[arg(required = true)]
        config_files: Vec<PathBuf>,
    },

    /// Disable detectors and their mappings for each metric
    Disable {
        #[arg(required = true)]
        config_files: Vec<PathBuf>,
    },

    /// Delete detectors and their mappings for each metric
    Delete {
        #[arg(required = true)]
        config_files: Vec<PathBuf>,
    },

    /// Write added/modified/deleted metrics between two config files
    Diff {
        previous_file: PathBuf,
        current_file: PathBuf,
        output_file: PathBuf,
    },
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load_or_default(cli.config.as_deref()).context("failed to load settings")?;
    settings.apply_process_env();
    if let Some(url) = &cli.model_service_url {
        settings.model_service.url = Some(url.clone());
    }
    if let Some(user) = &cli.model_service_user {
        settings.model_service.user = Some(user.clone());
    }
    if let Some(url) = &cli.datasource_url {
        settings.datasource.url = Some(url.clone());
    }
    if cli.log_json {
        settings.logging.json = true;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    adaptive_alerting::init_tracing(&settings.logging)?;

    let (action, files) = match cli.command {
        Commands::Build { config_files } => (Action::Build, config_files),
        Commands::Train { config_files } => (Action::Train, config_files),
        Commands::Disable { config_files } => (Action::Disable, config_files),
        Commands::Delete { config_files } => (Action::Delete, config_files),
        Commands::Diff {
            previous_file,
            current_file,
            output_file,
        } => {
            let code = commands::diff_files(&previous_file, &current_file, &output_file);
            return Ok(ExitCode::from(code));
        }
    };

    let client = match HttpModelService::from_settings(&settings.model_service) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Unable to create model service client");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };
    tracing::info!(?action, files = files.len(), "Starting");
    let code = commands::run_files(action, &files, &client, &settings.datasource).await;
    Ok(ExitCode::from(code))
}
