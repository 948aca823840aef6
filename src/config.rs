//! Component factory for environment-based configuration
//!
//! Builds the artifact store and the TSDB client from environment
//! variables so the same binary runs against in-process backends during
//! development and real services in production.

use crate::tsdb::{MemoryTsdb, PrometheusClient, TsdbClient, DEFAULT_TSDB_URL};
use crate::{Error, Result};
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, ObjectStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Artifact directory used by the local backend when `ARTIFACT_ROOT` is unset.
pub const DEFAULT_ARTIFACT_ROOT: &str = "./artifacts";

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the model artifact store from environment
    ///
    /// Environment variables:
    /// - ARTIFACT_BACKEND: "local" (default), "memory" or "s3"
    /// - ARTIFACT_ROOT: directory for the local backend (default: ./artifacts, created if missing)
    /// - S3_BUCKET: S3 bucket name (required for s3)
    /// - S3_REGION: S3 region (default: us-east-1)
    /// - S3_ENDPOINT: Custom S3 endpoint (optional, for MinIO)
    /// - AWS_ACCESS_KEY_ID: AWS credentials (optional, uses IAM role if not set)
    /// - AWS_SECRET_ACCESS_KEY: AWS credentials (optional)
    pub fn create_object_store() -> Result<Arc<dyn ObjectStore>> {
        object_store_from(|name| std::env::var(name).ok())
    }

    /// Create the TSDB client from environment
    ///
    /// Environment variables:
    /// - TSDB_BACKEND: "memory" (default) or "prometheus"
    /// - TSDB_URL: base URL for the prometheus backend (default: http://localhost:8428)
    pub fn create_tsdb() -> Result<TsdbClient> {
        tsdb_from(|name| std::env::var(name).ok())
    }
}

fn object_store_from(var: impl Fn(&str) -> Option<String>) -> Result<Arc<dyn ObjectStore>> {
    let backend = var("ARTIFACT_BACKEND").unwrap_or_else(|| "local".to_string());

    match backend.as_str() {
        "memory" => {
            warn!("Using in-memory artifact store, fitted models are lost on exit");
            Ok(Arc::new(InMemory::new()))
        }
        "local" => {
            let root = var("ARTIFACT_ROOT").unwrap_or_else(|| DEFAULT_ARTIFACT_ROOT.to_string());
            std::fs::create_dir_all(&root)?;
            info!(root = %root, "Using local artifact store");
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&root)?))
        }
        "s3" => {
            let bucket = var("S3_BUCKET").ok_or_else(|| {
                Error::Config("S3_BUCKET required when ARTIFACT_BACKEND=s3".to_string())
            })?;
            let region = var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string());

            info!(bucket = %bucket, region = %region, "Using S3 artifact store");

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(&bucket)
                .with_region(&region);

            // Support custom endpoints (MinIO, LocalStack)
            if let Some(endpoint) = var("S3_ENDPOINT") {
                info!(endpoint = %endpoint, "Using custom S3 endpoint");
                builder = builder.with_endpoint(&endpoint).with_allow_http(true);
            }

            if let Some(key) = var("AWS_ACCESS_KEY_ID") {
                builder = builder.with_access_key_id(&key);
            }
            if let Some(secret) = var("AWS_SECRET_ACCESS_KEY") {
                builder = builder.with_secret_access_key(&secret);
            }

            Ok(Arc::new(builder.build()?))
        }
        _ => Err(Error::Config(format!(
            "Unknown ARTIFACT_BACKEND: {}. Use 'memory', 'local' or 's3'",
            backend
        ))),
    }
}

fn tsdb_from(var: impl Fn(&str) -> Option<String>) -> Result<TsdbClient> {
    let backend = var("TSDB_BACKEND").unwrap_or_else(|| "memory".to_string());

    match backend.as_str() {
        "memory" => {
            info!("Using in-memory TSDB (development mode)");
            Ok(TsdbClient::new(Arc::new(MemoryTsdb::new())))
        }
        "prometheus" => {
            let url = var("TSDB_URL").unwrap_or_else(|| DEFAULT_TSDB_URL.to_string());
            info!(url = %url, "Using Prometheus-compatible TSDB");
            Ok(TsdbClient::new(Arc::new(PrometheusClient::new(url)?)))
        }
        _ => Err(Error::Config(format!(
            "Unknown TSDB_BACKEND: {}. Use 'memory' or 'prometheus'",
            backend
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_artifact_backend_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("artifacts");
        let root = root.to_str().unwrap();

        let store = object_store_from(vars(&[("ARTIFACT_ROOT", root)])).unwrap();
        assert!(store.to_string().starts_with("LocalFileSystem"), "{store}");
        assert!(dir.path().join("artifacts").is_dir());

        assert!(tsdb_from(vars(&[])).is_ok());
    }

    #[test]
    fn test_memory_backend_on_request() {
        let store = object_store_from(vars(&[("ARTIFACT_BACKEND", "memory")])).unwrap();
        assert_eq!(store.to_string(), "InMemory");
    }

    #[test]
    fn test_unknown_backends_rejected() {
        assert!(object_store_from(vars(&[("ARTIFACT_BACKEND", "gcs")])).is_err());
        assert!(matches!(
            tsdb_from(vars(&[("TSDB_BACKEND", "influx")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_s3_requires_bucket() {
        assert!(object_store_from(vars(&[("ARTIFACT_BACKEND", "s3")])).is_err());
    }
}
