//! Configuration for all ocrgate services.
//!
//! One YAML file configures every subcommand; each service reads the sections
//! it needs. Search order:
//! 1. Explicit path if provided
//! 2. ./ocrgate.yml
//! 3. ~/.config/ocrgate/ocrgate.yml
//! 4. Defaults

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::Role;
use crate::inference::labels::default_labels;

/// Header carrying the caller's role from the Gateway to downstream services.
pub const DEFAULT_ROLE_HEADER: &str = "X-User-Role";

/// Header carrying the Gateway's shared trust token.
pub const GATEWAY_TOKEN_HEADER: &str = "X-Gateway-Token";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub gateway: GatewayConfig,
    pub inference: InferenceConfig,
    pub tracking: TrackingConfig,
    pub retrain: RetrainConfig,
    pub stage: StageServiceConfig,
    pub trust: TrustConfig,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub inference_url: String,
    pub ingestion_url: String,
    pub training_url: String,
    /// Timeout for `/predict` forwards
    pub request_timeout_ms: u64,
    /// Timeout for `/ingest` and `/train` forwards, which block until the job ends
    pub stage_timeout_ms: u64,
    pub role_header: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8111".to_string(),
            inference_url: "http://prediction_service:8300".to_string(),
            ingestion_url: "http://ingestion_service:8100".to_string(),
            training_url: "http://training_service:8200".to_string(),
            request_timeout_ms: 30000,
            stage_timeout_ms: 7_260_000,
            role_header: DEFAULT_ROLE_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub bind: String,
    pub experiment: String,
    pub labels: Vec<String>,
    pub resolve_on_start: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8300".to_string(),
            experiment: "OCR_CNN_Training".to_string(),
            labels: default_labels(),
            resolve_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingBackend {
    Jsonl,
    Mlflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub backend: TrackingBackend,
    pub dir: PathBuf,
    pub mlflow_uri: String,
    pub metric: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::Jsonl,
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ocrgate")
                .join("tracking"),
            mlflow_uri: "http://localhost:5000".to_string(),
            metric: "val_accuracy".to_string(),
        }
    }
}

/// How the orchestrator runs one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageJobConfig {
    /// Run a local shell command
    Command { command: String, timeout_ms: u64 },
    /// Call a stage service endpoint
    Http { url: String, timeout_ms: u64 },
}

impl StageJobConfig {
    pub fn timeout_ms(&self) -> u64 {
        match self {
            StageJobConfig::Command { timeout_ms, .. } | StageJobConfig::Http { timeout_ms, .. } => {
                *timeout_ms
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    pub ingestion: StageJobConfig,
    pub training: StageJobConfig,
    pub reload_url: Option<String>,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            ingestion: StageJobConfig::Http {
                url: "http://ingestion_service:8100/ingest".to_string(),
                timeout_ms: 1_800_000,
            },
            training: StageJobConfig::Http {
                url: "http://training_service:8200/train".to_string(),
                timeout_ms: 7_200_000,
            },
            reload_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageServiceConfig {
    pub ingest_bind: String,
    pub train_bind: String,
    pub ingest_command: String,
    pub train_command: String,
    pub timeout_ms: u64,
}

impl Default for StageServiceConfig {
    fn default() -> Self {
        Self {
            ingest_bind: "0.0.0.0:8100".to_string(),
            train_bind: "0.0.0.0:8200".to_string(),
            ingest_command: "dvc repro one_hot_encode_labels".to_string(),
            train_command: "dvc repro --downstream setup_callbacks".to_string(),
            timeout_ms: 7_200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub shared_secret: Option<String>,
}

/// One credential store entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub secret_hash: String,
    pub role: Role,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            gateway: GatewayConfig::default(),
            inference: InferenceConfig::default(),
            tracking: TrackingConfig::default(),
            retrain: RetrainConfig::default(),
            stage: StageServiceConfig::default(),
            trust: TrustConfig::default(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        let project_config = PathBuf::from(format!("{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.inference.experiment.trim().is_empty() {
            eyre::bail!("inference.experiment must not be empty");
        }
        if self.inference.labels.is_empty() {
            eyre::bail!("inference.labels must not be empty");
        }
        if self.gateway.request_timeout_ms == 0 || self.gateway.stage_timeout_ms == 0 {
            eyre::bail!("gateway request_timeout_ms and stage_timeout_ms must be > 0");
        }
        if self.retrain.ingestion.timeout_ms() == 0 || self.retrain.training.timeout_ms() == 0 {
            eyre::bail!("retrain stage timeout_ms must be > 0");
        }
        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.username.as_str()) {
                eyre::bail!("duplicate username in users: {}", user.username);
            }
        }
        Ok(())
    }
}
