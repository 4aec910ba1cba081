//! CLI command definitions using clap.
//!
//! One subcommand per service plus a few operator tools:
//! - gateway / inference / stage: run an HTTP service
//! - retrain: run the pipeline once from the command line
//! - hash-secret: produce a credential store hash
//! - runs / resolve: inspect the tracking store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ocrgate - gateway, inference and retraining for a handwriting OCR model
#[derive(Parser, Debug)]
#[command(name = "ocrgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the authenticating gateway
    Gateway {
        /// Address to bind (overrides gateway.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run the inference service
    Inference {
        /// Address to bind (overrides inference.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run a stage service
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },

    /// Run ingestion then training once
    Retrain {
        /// Admin username
        #[arg(short, long, env = "OCRGATE_USERNAME")]
        username: String,

        /// Admin password
        #[arg(short, long, env = "OCRGATE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Hash a secret for the users section of the config
    HashSecret {
        /// Secret to hash; read from stdin when omitted
        secret: Option<String>,

        /// argon2 memory cost in KiB
        #[arg(short, long, default_value_t = ocrgate::auth::credentials::DEFAULT_MEMORY_KIB)]
        memory: u32,

        /// argon2 time cost (passes)
        #[arg(short, long, default_value_t = ocrgate::auth::credentials::DEFAULT_TIME_COST)]
        time_cost: u32,
    },

    /// Inspect or record training runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },

    /// Show which run would be served
    Resolve {
        /// Experiment name (overrides inference.experiment)
        #[arg(short, long)]
        experiment: Option<String>,

        /// Also load the artifact to check it is usable
        #[arg(short, long)]
        load: bool,
    },
}

/// Stage service subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum StageCommands {
    /// Serve GET /ingest
    Ingest {
        /// Address to bind (overrides stage.ingest_bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Serve GET /train
    Train {
        /// Address to bind (overrides stage.train_bind)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

/// Tracking store subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum RunsCommands {
    /// List runs of an experiment, best first
    List {
        /// Experiment name (overrides inference.experiment)
        #[arg(short, long)]
        experiment: Option<String>,
    },

    /// Record a finished training run
    Record {
        /// Validation metric of the run
        #[arg(short, long)]
        metric: f64,

        /// Model artifact location
        #[arg(short, long)]
        artifact: String,

        /// Experiment name (overrides inference.experiment)
        #[arg(short, long)]
        experiment: Option<String>,

        /// Run id; generated when omitted
        #[arg(short, long)]
        run_id: Option<String>,
    },
}
