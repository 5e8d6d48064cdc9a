//! Read access to the bucket an event came from.
//!
//! `GcsObjectStore` talks to the Cloud Storage JSON API; `LocalObjectStore`
//! serves `<root>/<bucket>/<key>` from disk for local runs.

use crate::services::credentials::{CredentialsError, TokenSource};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use reqwest::{Client, StatusCode, Url};
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Object payload, chunk by chunk.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("access to object `{key}` in bucket `{bucket}` denied")]
    AccessDenied { bucket: String, key: String },
    #[error("bucket name `{0}` is not usable")]
    InvalidBucketName(String),
    #[error("storage endpoint `{0}` cannot carry a path")]
    InvalidEndpoint(String),
    #[error("storage returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start reading `key` from `bucket`. Errors that can be detected before
    /// the first byte (missing object, permissions) are returned here.
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, ObjectStoreError>;
}

/// Cloud Storage JSON API client (`GET /storage/v1/b/{bucket}/o/{key}?alt=media`).
pub struct GcsObjectStore {
    client: Client,
    endpoint: Url,
    tokens: Arc<TokenSource>,
}

impl GcsObjectStore {
    pub fn new(client: Client, endpoint: Url, tokens: Arc<TokenSource>) -> Self {
        Self {
            client,
            endpoint,
            tokens,
        }
    }

    fn media_url(&self, bucket: &str, key: &str) -> Result<Url, ObjectStoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            // `key` becomes a single segment, so its slashes are percent-encoded.
            .extend(["storage", "v1", "b", bucket, "o", key]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        let url = self.media_url(bucket, key)?;
        debug!("GET {}", url);

        let request = self.tokens.authorize(self.client.get(url)).await?;
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => {
                Ok(response.bytes_stream().map_err(io::Error::other).boxed())
            }
            StatusCode::NOT_FOUND => Err(ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ObjectStoreError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            status => Err(ObjectStoreError::Upstream {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Buckets as directories under `root`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']) {
            return Err(ObjectStoreError::InvalidBucketName(bucket.to_string()));
        }

        let path = self.root.join(bucket).join(key);
        debug!("opening local object {}", path.display());
        let file = File::open(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            ErrorKind::PermissionDenied => ObjectStoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => ObjectStoreError::Io(err),
        })?;

        Ok(ReaderStream::new(file).boxed())
    }
}
