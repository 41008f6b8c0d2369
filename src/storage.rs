//! Byte blob storage for message templates and images.
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn healthcheck(&self) -> Result<()>;
}

/// Build the configured backend.
pub fn from_config(cfg: &Config) -> Result<Arc<dyn BlobStore>> {
    Ok(match &cfg.storage.backend {
        StorageBackend::Fs { root } => Arc::new(FsBlobStore::new(root)),
        StorageBackend::S3 {
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
        } => {
            let config = s3_config(endpoint, region, access_key_id, secret_access_key).build();
            Arc::new(S3BlobStore::new(config, bucket.clone()))
        }
    })
}

/// Keys map to files under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.trim().is_empty() || escapes {
            return Err(Error::Storage(format!("invalid key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip_all, fields(key = key))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::Storage(format!("no blob at {}", path.display())))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip_all, fields(key = key, len = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "stored blob");
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(Error::Storage(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Connection settings for an S3 compatible bucket. Path-style addressing,
/// so MinIO and similar servers work without bucket subdomains.
pub fn s3_config(
    endpoint: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> aws_sdk_s3::config::Builder {
    let credentials = Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        "wedding-guest-bot",
    );
    aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(endpoint)
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .force_path_style(true)
}

/// Blobs stored as objects of one S3 bucket, keyed by their storage path.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(config: aws_sdk_s3::Config, bucket: impl Into<String>) -> Self {
        Self {
            client: S3Client::from_conf(config),
            bucket: bucket.into(),
        }
    }
}

fn object_key(key: &str) -> Result<&str> {
    let key = key.trim_start_matches('/');
    if key.trim().is_empty() {
        return Err(Error::Storage("empty object key".into()));
    }
    Ok(key)
}

fn s3_err<E>(action: &str, key: &str, err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Storage(format!("{} {}: {}", action, key, DisplayErrorContext(&err)))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip_all, fields(bucket = %self.bucket, key = key))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let key = object_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Error::Storage(format!("no blob at {}/{}", self.bucket, key))
                } else {
                    s3_err("get_object", key, err)
                }
            })?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| s3_err("read body of", key, err))?;
        Ok(body.into_bytes().to_vec())
    }

    #[instrument(skip_all, fields(bucket = %self.bucket, key = key, len = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let key = object_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| s3_err("put_object", key, err))?;
        debug!("stored blob");
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| {
                warn!(bucket = %self.bucket, "bucket is not reachable");
                s3_err("head_bucket", &self.bucket, err)
            })?;
        info!(bucket = %self.bucket, "storage is reachable");
        Ok(())
    }
}
