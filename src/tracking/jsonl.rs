//! JSONL-based tracking store with in-memory caching.
//!
//! Records are append-only: runs are never updated or deleted here.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::run::{Experiment, TrainingRun};
use super::traits::TrackingStore;
use crate::error::{OcrError, Result};
use crate::id::generate_experiment_id;

const EXPERIMENTS: &str = "experiments";
const RUNS: &str = "runs";

/// JSONL-based tracking store with in-memory caching.
pub struct JsonlTrackingStore {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl JsonlTrackingStore {
    /// Create a store rooted at the given directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(|e| OcrError::Tracking(e.to_string()))?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(|e| OcrError::Tracking(e.to_string()))?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let records = self.read_collection(collection)?;
        cache.insert(collection.to_string(), records);
        Ok(())
    }

    fn read_collection(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let path = self.collection_path(collection);
        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    records.push(serde_json::from_str(&line)?);
                }
            }
        }
        Ok(records)
    }

    fn all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;
        let cache = self.cache.read().map_err(|e| OcrError::Tracking(e.to_string()))?;
        cache
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .map(|r| serde_json::from_value(r.clone()).map_err(OcrError::from))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Append to the file first, then to the cache, unless `exists` matches a
    /// record already in the collection. The check and the write share one
    /// write lock. Returns whether the record was appended.
    fn append_unless<T: Serialize>(
        &self,
        collection: &str,
        record: &T,
        exists: impl Fn(&serde_json::Value) -> bool,
    ) -> Result<bool> {
        let value = serde_json::to_value(record)?;

        let mut cache = self.cache.write().map_err(|e| OcrError::Tracking(e.to_string()))?;
        if !cache.contains_key(collection) {
            let records = self.read_collection(collection)?;
            cache.insert(collection.to_string(), records);
        }
        let records = cache.entry(collection.to_string()).or_default();
        if records.iter().any(exists) {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))?;
        writeln!(file, "{}", serde_json::to_string(&value)?)?;

        records.push(value);
        Ok(true)
    }

    /// Drop cached collections so the next read goes back to disk.
    pub fn invalidate(&self) -> Result<()> {
        self.cache
            .write()
            .map_err(|e| OcrError::Tracking(e.to_string()))?
            .clear();
        Ok(())
    }

    fn find_experiment(&self, name: &str) -> Result<Option<Experiment>> {
        Ok(self
            .all::<Experiment>(EXPERIMENTS)?
            .into_iter()
            .find(|e| e.name == name))
    }

    /// Create an experiment, or return the existing one with that name.
    pub fn create_experiment(&self, name: &str) -> Result<Experiment> {
        if let Some(existing) = self.find_experiment(name)? {
            return Ok(existing);
        }
        let experiment = Experiment {
            experiment_id: generate_experiment_id(),
            name: name.to_string(),
        };
        if self.append_unless(EXPERIMENTS, &experiment, |r| field(r, "name") == Some(name))? {
            log::info!("Created experiment '{}' ({})", name, experiment.experiment_id);
            return Ok(experiment);
        }
        // Lost a race with another writer
        self.find_experiment(name)?
            .ok_or_else(|| OcrError::Tracking(format!("experiment '{}' vanished", name)))
    }

    /// Record a completed run. The experiment is created on first use.
    pub fn record_run(&self, run: &TrainingRun) -> Result<()> {
        if !run.metric_value.is_finite() {
            return Err(OcrError::Tracking(format!(
                "run {} has a non-finite metric value",
                run.run_id
            )));
        }
        self.create_experiment(&run.experiment_name)?;
        let appended = self.append_unless(RUNS, run, |r| {
            field(r, "experiment_name") == Some(run.experiment_name.as_str())
                && field(r, "run_id") == Some(run.run_id.as_str())
        })?;
        if !appended {
            return Err(OcrError::Tracking(format!(
                "run {} already recorded in experiment '{}'",
                run.run_id, run.experiment_name
            )));
        }
        log::info!(
            "Recorded run {} in '{}' (metric {})",
            run.run_id,
            run.experiment_name,
            run.metric_value
        );
        Ok(())
    }
}

fn field<'a>(record: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    record.get(name).and_then(|v| v.as_str())
}

#[async_trait]
impl TrackingStore for JsonlTrackingStore {
    // Resolution starts here; re-read so runs appended by other processes count.
    async fn experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        self.invalidate()?;
        self.find_experiment(name)
    }

    async fn runs(&self, experiment: &Experiment) -> Result<Vec<TrainingRun>> {
        Ok(self
            .all::<TrainingRun>(RUNS)?
            .into_iter()
            .filter(|r| r.experiment_name == experiment.name)
            .collect())
    }
}
