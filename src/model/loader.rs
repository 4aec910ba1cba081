//! Loading model artifacts from their recorded URI

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::Model;
use super::dense::DenseModel;
use crate::error::{OcrError, Result};

/// Turns an artifact URI into an executable model
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, artifact_uri: &str) -> Result<Arc<dyn Model>>;
}

/// Loads `dense-softmax-v1` artifacts from disk or over HTTP
pub struct ArtifactLoader {
    client: Client,
}

impl ArtifactLoader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| OcrError::LoadFailure(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .map_err(|e| OcrError::LoadFailure(format!("{}: {}", uri, e)))?;
            if !response.status().is_success() {
                return Err(OcrError::LoadFailure(format!("{}: HTTP {}", uri, response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| OcrError::LoadFailure(format!("{}: {}", uri, e)))?;
            return Ok(bytes.to_vec());
        }

        let path = local_path(uri)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| OcrError::LoadFailure(format!("{}: {}", path.display(), e)))
    }
}

/// Map `file://` URIs and bare paths to a filesystem path
fn local_path(uri: &str) -> Result<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    match uri.split_once("://") {
        Some((scheme, _)) => Err(OcrError::LoadFailure(format!(
            "unsupported artifact scheme '{}'",
            scheme
        ))),
        None if uri.contains(":/") && !uri.starts_with('/') => Err(OcrError::LoadFailure(format!(
            "unsupported artifact uri '{}'",
            uri
        ))),
        None => Ok(PathBuf::from(uri)),
    }
}

#[async_trait]
impl ModelLoader for ArtifactLoader {
    async fn load(&self, artifact_uri: &str) -> Result<Arc<dyn Model>> {
        let bytes = self.fetch(artifact_uri).await?;
        let model = DenseModel::from_json(&bytes)?;
        log::info!(
            "Loaded model artifact {} ({} classes)",
            artifact_uri,
            model.output_size()
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_path_forms() {
        assert_eq!(local_path("file:///m/model.json").unwrap(), PathBuf::from("/m/model.json"));
        assert_eq!(local_path("/m/model.json").unwrap(), PathBuf::from("/m/model.json"));
        assert_eq!(local_path("models/model.json").unwrap(), PathBuf::from("models/model.json"));
        assert!(local_path("s3://bucket/model.json").is_err());
        assert!(local_path("runs:/abc/model").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, DenseModel::constant(20, 3).unwrap().to_json().unwrap()).unwrap();

        let loader = ArtifactLoader::new().unwrap();
        let model = loader.load(&format!("file://{}", path.display())).await.unwrap();
        assert_eq!(model.output_size(), 20);
    }

    #[tokio::test]
    async fn test_missing_file_is_load_failure() {
        let loader = ArtifactLoader::new().unwrap();
        let err = loader.load("/nonexistent/model.json").await.err().unwrap();
        assert!(matches!(err, OcrError::LoadFailure(_)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_load_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();

        let loader = ArtifactLoader::new().unwrap();
        let err = loader.load(path.to_str().unwrap()).await.err().unwrap();
        assert!(matches!(err, OcrError::LoadFailure(_)));
    }
}
