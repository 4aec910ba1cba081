use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{Commands, RunsCommands, StageCommands};
use ocrgate::auth::{Authenticator, Credential, CredentialStore, credentials::hash_secret_with};
use ocrgate::config::Config;
use ocrgate::inference::{InferenceService, LabelVocabulary};
use ocrgate::model::{ArtifactLoader, ModelResolver, select_best};
use ocrgate::retrain::{CommandJob, Orchestrator, Stage};
use ocrgate::server::{
    GatewayState, InferenceState, StageState, gateway_router, inference_router, serve, stage_router,
};
use ocrgate::tracking::{JsonlTrackingStore, TrainingRun, open_store};
use ocrgate::{OcrError, id};

fn setup_logging(config: &Config, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    match &cli.command {
        Commands::Gateway { bind } => run_gateway(config, bind.as_deref()).await,
        Commands::Inference { bind } => run_inference(config, bind.as_deref()).await,
        Commands::Stage { command } => run_stage(command, config).await,
        Commands::Retrain { username, password } => handle_retrain(username, password, config).await,
        Commands::HashSecret {
            secret,
            memory,
            time_cost,
        } => handle_hash_secret(secret.as_deref(), *memory, *time_cost),
        Commands::Runs { command } => handle_runs(command, config).await,
        Commands::Resolve { experiment, load } => handle_resolve(experiment.as_deref(), *load, config).await,
    }
}

async fn run_gateway(config: &Config, bind: Option<&str>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config.retrain, &config.trust, &config.gateway.role_header)
        .context("Failed to build retrain orchestrator")?;
    let state = GatewayState::from_config(config, Arc::new(orchestrator))
        .context("Failed to build gateway state")?;
    if config.users.is_empty() {
        warn!("No users configured; every protected route will answer 401");
    }
    if config.trust.shared_secret.is_none() {
        warn!("trust.shared_secret is unset; backends will accept role headers from anyone who can reach them");
    }

    let bind = bind.unwrap_or(&config.gateway.bind);
    serve(gateway_router(state), bind, "Gateway").await?;
    Ok(())
}

async fn run_inference(config: &Config, bind: Option<&str>) -> Result<()> {
    let store = open_store(&config.tracking).context("Failed to open tracking store")?;
    let loader = Arc::new(ArtifactLoader::new()?);
    let resolver = Arc::new(ModelResolver::new(store, loader, config.inference.experiment.clone()));

    if config.inference.resolve_on_start {
        match resolver.current().await {
            Ok(model) => info!("Serving run {} from {}", model.run.run_id, model.artifact_uri),
            Err(e) => warn!("Initial model resolution failed, retrying on first request: {}", e),
        }
    }

    let labels = LabelVocabulary::new(config.inference.labels.clone())?;
    let state = InferenceState {
        service: Arc::new(InferenceService::new(resolver, labels)?),
        role_header: config.gateway.role_header.clone(),
        token: config.trust.shared_secret.clone(),
    };

    let bind = bind.unwrap_or(&config.inference.bind);
    serve(inference_router(state), bind, "Inference service").await?;
    Ok(())
}

async fn run_stage(command: &StageCommands, config: &Config) -> Result<()> {
    let (stage, job, default_bind, bind) = match command {
        StageCommands::Ingest { bind } => (
            Stage::Ingestion,
            &config.stage.ingest_command,
            &config.stage.ingest_bind,
            bind,
        ),
        StageCommands::Train { bind } => (
            Stage::Training,
            &config.stage.train_command,
            &config.stage.train_bind,
            bind,
        ),
    };
    let state = StageState::new(
        stage,
        Arc::new(CommandJob::new(job.clone())),
        Duration::from_millis(config.stage.timeout_ms),
        config.trust.shared_secret.clone(),
    );

    let bind = bind.as_deref().unwrap_or(default_bind);
    serve(stage_router(state), bind, &format!("{} service", stage)).await?;
    Ok(())
}

async fn handle_retrain(username: &str, password: &str, config: &Config) -> Result<()> {
    let store = CredentialStore::from_config(&config.users)?;
    let caller = Authenticator::new(Arc::new(store)).authenticate(&Credential::new(username, password))?;
    let orchestrator = Orchestrator::from_config(&config.retrain, &config.trust, &config.gateway.role_header)?;

    println!("{}", "Starting retrain...".cyan());
    match orchestrator.trigger_retrain(&caller).await {
        Ok(report) => {
            println!("{} {}", "Retrain completed:".green(), report.job_id);
            for stage in &report.stages {
                println!("  {} {}", format!("[{}]", stage.stage).cyan(), stage.output.trim());
            }
            if !report.model_reloaded {
                println!("{}", "Model was not reloaded".yellow());
            }
            Ok(())
        }
        Err(OcrError::StageFailure { stage, detail }) => {
            println!("{} {}", format!("{} failed:", stage).red(), detail);
            eyre::bail!("retrain failed at the {} stage", stage)
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_hash_secret(secret: Option<&str>, memory_kib: u32, time_cost: u32) -> Result<()> {
    let secret = match secret {
        Some(secret) => secret.to_string(),
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read secret from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if secret.is_empty() {
        eyre::bail!("secret must not be empty");
    }
    println!("{}", hash_secret_with(&secret, memory_kib, time_cost)?);
    Ok(())
}

async fn handle_runs(command: &RunsCommands, config: &Config) -> Result<()> {
    match command {
        RunsCommands::List { experiment } => {
            let name = experiment.as_deref().unwrap_or(&config.inference.experiment);
            let store = open_store(&config.tracking)?;
            let Some(exp) = store.experiment_by_name(name).await? else {
                println!("{} {}", "No such experiment:".red(), name);
                return Ok(());
            };

            let mut runs = store.runs(&exp).await?;
            let best = select_best(&runs).map(|r| r.run_id.clone());
            runs.sort_by(|a, b| b.metric_value.total_cmp(&a.metric_value));
            println!("{} {} ({} runs)", "Experiment:".green(), exp.name, runs.len());
            for run in &runs {
                let marker = if best.as_deref() == Some(run.run_id.as_str()) { "*" } else { " " };
                println!(
                    "{} {}  {:.4}  {}  {}",
                    marker.green(),
                    run.run_id,
                    run.metric_value,
                    run.timestamp.to_rfc3339(),
                    run.artifact_uri
                );
            }
            Ok(())
        }
        RunsCommands::Record {
            metric,
            artifact,
            experiment,
            run_id,
        } => {
            let store = JsonlTrackingStore::new(&config.tracking.dir)?;
            let run = TrainingRun::new(
                run_id.clone().unwrap_or_else(id::generate_run_id),
                experiment.as_deref().unwrap_or(&config.inference.experiment),
                *metric,
                artifact.clone(),
                chrono::Utc::now(),
            );
            store.record_run(&run)?;
            println!("{} {}", "Recorded run:".green(), run.run_id);
            Ok(())
        }
    }
}

async fn handle_resolve(experiment: Option<&str>, load: bool, config: &Config) -> Result<()> {
    let name = experiment.unwrap_or(&config.inference.experiment);
    let store = open_store(&config.tracking)?;
    let Some(exp) = store.experiment_by_name(name).await? else {
        eyre::bail!(OcrError::NoSuchExperiment(name.to_string()));
    };
    let runs = store.runs(&exp).await?;
    let Some(best) = select_best(&runs) else {
        eyre::bail!(OcrError::NoRuns(name.to_string()));
    };

    println!("{} {}", "Selected run:".green(), best.run_id);
    println!("  metric:    {}", best.metric_value);
    println!("  recorded:  {}", best.timestamp.to_rfc3339());
    println!("  artifact:  {}", best.artifact_uri);

    if load {
        let resolver = ModelResolver::new(store, Arc::new(ArtifactLoader::new()?), name);
        let resolved = resolver.resolve_latest(name).await?;
        println!(
            "{} {} outputs",
            "Artifact loads:".green(),
            resolved.handle.output_size()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config, cli.is_verbose());
    info!("Starting with config from: {:?}", cli.config);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime
        .block_on(run_application(&cli, &config))
        .context("Application failed")?;

    Ok(())
}
