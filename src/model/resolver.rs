//! Production model resolution
//!
//! The active model is the run with the highest metric value; ties go to the
//! most recent timestamp. The resolved handle is cached and swapped in place on
//! re-resolution. Readers clone the `Arc` and drop the lock immediately, so a
//! swap never waits on in-flight predictions and they keep the handle they
//! started with.

use std::cmp::Ordering;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::{Mutex, RwLock};

use super::Model;
use super::loader::ModelLoader;
use crate::error::{OcrError, Result};
use crate::tracking::{TrackingStore, TrainingRun};

/// A loaded production model and the run it came from
pub struct ResolvedModel {
    pub run: TrainingRun,
    pub artifact_uri: String,
    pub handle: Arc<dyn Model>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("run_id", &self.run.run_id)
            .field("artifact_uri", &self.artifact_uri)
            .finish_non_exhaustive()
    }
}

/// Apply the resolution policy to a set of runs
pub fn select_best(runs: &[TrainingRun]) -> Option<&TrainingRun> {
    runs.iter()
        .filter(|r| r.metric_value.is_finite())
        .max_by(|a, b| match a.metric_value.total_cmp(&b.metric_value) {
            Ordering::Equal => a.timestamp.cmp(&b.timestamp),
            other => other,
        })
}

pub struct ModelResolver {
    store: Arc<dyn TrackingStore>,
    loader: Arc<dyn ModelLoader>,
    experiment: String,
    current: RwLock<Option<Arc<ResolvedModel>>>,
    resolving: Mutex<()>,
}

impl ModelResolver {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        loader: Arc<dyn ModelLoader>,
        experiment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            loader,
            experiment: experiment.into(),
            current: RwLock::new(None),
            resolving: Mutex::new(()),
        }
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Resolve the best run of `experiment_name` and load it. Does not touch the cache.
    pub async fn resolve_latest(&self, experiment_name: &str) -> Result<ResolvedModel> {
        info!("Fetching the best model for experiment '{}'", experiment_name);
        let experiment = self
            .store
            .experiment_by_name(experiment_name)
            .await?
            .ok_or_else(|| OcrError::NoSuchExperiment(experiment_name.to_string()))?;

        let runs = self.store.runs(&experiment).await?;
        let best = select_best(&runs)
            .cloned()
            .ok_or_else(|| OcrError::NoRuns(experiment_name.to_string()))?;

        let handle = self.loader.load(&best.artifact_uri).await?;
        info!(
            "Resolved run {} (metric {}) from {} candidates",
            best.run_id,
            best.metric_value,
            runs.len()
        );
        Ok(ResolvedModel {
            artifact_uri: best.artifact_uri.clone(),
            run: best,
            handle,
        })
    }

    /// Cached model, resolving it on first use
    pub async fn current(&self) -> Result<Arc<ResolvedModel>> {
        if let Some(model) = self.active().await {
            return Ok(model);
        }

        let _guard = self.resolving.lock().await;
        if let Some(model) = self.active().await {
            return Ok(model);
        }
        let resolved = Arc::new(self.resolve_latest(&self.experiment).await?);
        *self.current.write().await = Some(resolved.clone());
        Ok(resolved)
    }

    /// Cached model without resolving
    pub async fn active(&self) -> Option<Arc<ResolvedModel>> {
        self.current.read().await.clone()
    }

    /// Re-run resolution and swap the cached handle.
    ///
    /// On failure the previous handle stays active and the error is returned
    /// to the caller.
    pub async fn invalidate_and_reresolve(&self) -> Result<Arc<ResolvedModel>> {
        let _guard = self.resolving.lock().await;
        match self.resolve_latest(&self.experiment).await {
            Ok(resolved) => {
                let resolved = Arc::new(resolved);
                let previous = self.current.write().await.replace(resolved.clone());
                info!(
                    "Active model switched from {} to {}",
                    previous.map(|p| p.run.run_id.clone()).unwrap_or_else(|| "<none>".into()),
                    resolved.run.run_id
                );
                Ok(resolved)
            }
            Err(e) => {
                error!("Re-resolution of '{}' failed: {}", self.experiment, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DenseModel, Tensor4};
    use crate::tracking::Experiment;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct MemoryStore {
        experiments: Vec<Experiment>,
        runs: StdMutex<Vec<TrainingRun>>,
    }

    impl MemoryStore {
        fn new(runs: Vec<TrainingRun>) -> Self {
            Self {
                experiments: vec![Experiment {
                    experiment_id: "1".to_string(),
                    name: "ocr".to_string(),
                }],
                runs: StdMutex::new(runs),
            }
        }
    }

    #[async_trait]
    impl TrackingStore for MemoryStore {
        async fn experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
            Ok(self.experiments.iter().find(|e| e.name == name).cloned())
        }

        async fn runs(&self, experiment: &Experiment) -> Result<Vec<TrainingRun>> {
            Ok(self
                .runs
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.experiment_name == experiment.name)
                .cloned()
                .collect())
        }
    }

    /// Loads a constant model; artifacts named "corrupt" fail
    #[derive(Default)]
    struct StubLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModelLoader for StubLoader {
        async fn load(&self, artifact_uri: &str) -> Result<Arc<dyn Model>> {
            self.loads.fetch_add(1, AtomicOrdering::SeqCst);
            if artifact_uri.contains("corrupt") {
                return Err(OcrError::LoadFailure(format!("{}: bad bytes", artifact_uri)));
            }
            Ok(Arc::new(DenseModel::constant(20, 0)?))
        }
    }

    fn run(id: &str, metric: f64, minutes: i64) -> TrainingRun {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        TrainingRun::new(id, "ocr", metric, format!("/models/{}.json", id), base + Duration::minutes(minutes))
    }

    fn resolver(runs: Vec<TrainingRun>) -> (ModelResolver, Arc<MemoryStore>, Arc<StubLoader>) {
        let store = Arc::new(MemoryStore::new(runs));
        let loader = Arc::new(StubLoader::default());
        (ModelResolver::new(store.clone(), loader.clone(), "ocr"), store, loader)
    }

    #[test]
    fn test_select_best_breaks_ties_by_recency() {
        let runs = vec![run("1", 0.80, 0), run("2", 0.92, 1), run("3", 0.92, 2)];
        assert_eq!(select_best(&runs).unwrap().run_id, "3");
    }

    #[test]
    fn test_select_best_order_independent() {
        let runs = vec![run("3", 0.92, 2), run("1", 0.80, 0), run("2", 0.92, 1)];
        assert_eq!(select_best(&runs).unwrap().run_id, "3");
    }

    #[test]
    fn test_select_best_prefers_metric_over_recency() {
        let runs = vec![run("old", 0.95, 0), run("new", 0.90, 10)];
        assert_eq!(select_best(&runs).unwrap().run_id, "old");
    }

    #[test]
    fn test_select_best_ignores_nan() {
        let runs = vec![run("nan", f64::NAN, 5), run("ok", 0.5, 0)];
        assert_eq!(select_best(&runs).unwrap().run_id, "ok");
        assert!(select_best(&[]).is_none());
    }

    #[tokio::test]
    async fn test_resolve_latest_picks_tie_winner() {
        let (resolver, _, _) =
            resolver(vec![run("1", 0.80, 0), run("2", 0.92, 1), run("3", 0.92, 2)]);
        let resolved = resolver.resolve_latest("ocr").await.unwrap();
        assert_eq!(resolved.run.run_id, "3");
        assert_eq!(resolved.artifact_uri, "/models/3.json");
    }

    #[tokio::test]
    async fn test_resolve_latest_no_runs() {
        let (resolver, _, _) = resolver(vec![]);
        let err = resolver.resolve_latest("ocr").await.unwrap_err();
        assert!(matches!(err, OcrError::NoRuns(ref e) if e == "ocr"));
    }

    #[tokio::test]
    async fn test_resolve_latest_unknown_experiment() {
        let (resolver, _, _) = resolver(vec![run("1", 0.8, 0)]);
        let err = resolver.resolve_latest("missing").await.unwrap_err();
        assert!(matches!(err, OcrError::NoSuchExperiment(_)));
    }

    #[tokio::test]
    async fn test_resolve_latest_load_failure() {
        let (resolver, _, _) = resolver(vec![run("corrupt", 0.9, 0)]);
        let err = resolver.resolve_latest("ocr").await.unwrap_err();
        assert!(matches!(err, OcrError::LoadFailure(_)));
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let (resolver, _, _) = resolver(vec![run("1", 0.8, 0), run("2", 0.9, 1)]);
        let a = resolver.resolve_latest("ocr").await.unwrap();
        let b = resolver.resolve_latest("ocr").await.unwrap();
        assert_eq!(a.run, b.run);
        let input = Tensor4::new([1, 28, 28, 1], vec![0.3; 784]).unwrap();
        assert_eq!(a.handle.predict(&input).unwrap(), b.handle.predict(&input).unwrap());
    }

    #[tokio::test]
    async fn test_current_caches_handle() {
        let (resolver, _, loader) = resolver(vec![run("1", 0.8, 0)]);
        assert!(resolver.active().await.is_none());
        let a = resolver.current().await.unwrap();
        let b = resolver.current().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reresolve_picks_up_new_run_and_keeps_old_handle_alive() {
        let (resolver, store, _) = resolver(vec![run("1", 0.8, 0)]);
        let before = resolver.current().await.unwrap();
        store.runs.lock().unwrap().push(run("2", 0.95, 5));

        let after = resolver.invalidate_and_reresolve().await.unwrap();
        assert_eq!(after.run.run_id, "2");
        assert_eq!(before.run.run_id, "1");
        assert_eq!(resolver.current().await.unwrap().run.run_id, "2");
    }

    #[tokio::test]
    async fn test_failed_reresolve_keeps_previous_model() {
        let (resolver, store, _) = resolver(vec![run("1", 0.8, 0)]);
        resolver.current().await.unwrap();
        store.runs.lock().unwrap().push(run("corrupt", 0.99, 5));

        let err = resolver.invalidate_and_reresolve().await.unwrap_err();
        assert!(matches!(err, OcrError::LoadFailure(_)));
        assert_eq!(resolver.active().await.unwrap().run.run_id, "1");
    }
}
