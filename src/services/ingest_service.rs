//! src/services/ingest_service.rs
//!
//! IngestService: the per-event pipeline. Filters the triggering object by
//! content type, downloads it into the scratch directory, asks the label
//! detector for labels, upserts the image record and removes the scratch
//! file. Every step short-circuits the rest on failure; nothing is retried
//! or compensated.

use crate::{
    models::{event::StorageObject, label::ImageRecord, naming::DerivedNaming},
    services::{
        document_store::{DocumentStore, DocumentStoreError},
        label_detector::{LabelDetectionError, LabelDetector},
        object_store::{ObjectStore, ObjectStoreError, ObjectStream},
    },
};
use futures::StreamExt;
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::info;
use uuid::Uuid;

/// Collection image records are written to.
pub const DEFAULT_COLLECTION: &str = "images";

const IMAGE_CONTENT_TYPE_PREFIX: &str = "image/";
const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAnImage,
    AlreadyJpeg,
    UnsupportedEventType,
}

/// Result of one successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Processed {
        #[serde(rename = "documentId")]
        document_id: String,
        labels: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("object key `{0}` cannot be mapped into the scratch directory")]
    InvalidObjectKey(String),
    #[error("scratch file `{}` failed: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download failed: {0}")]
    Download(#[from] ObjectStoreError),
    #[error("downloaded object `{key}` does not match its metadata: {detail}")]
    IntegrityMismatch { key: String, detail: String },
    #[error("label detection failed: {0}")]
    LabelDetection(#[from] LabelDetectionError),
    #[error("persisting image record failed: {0}")]
    Persist(#[from] DocumentStoreError),
    #[error("removing scratch file `{}` failed: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Decide whether an object with this declared content type is skipped.
///
/// Objects without a content type count as "not an image".
pub fn skip_reason(content_type: Option<&str>) -> Option<SkipReason> {
    match content_type {
        Some(ct) if ct.starts_with(JPEG_CONTENT_TYPE) => Some(SkipReason::AlreadyJpeg),
        Some(ct) if ct.starts_with(IMAGE_CONTENT_TYPE_PREFIX) => None,
        _ => Some(SkipReason::NotAnImage),
    }
}

/// Byte count and MD5 of a payload written to disk.
struct Downloaded {
    size_bytes: u64,
    md5: [u8; 16],
}

/// Handles storage events. Cheap to clone; the collaborators are shared.
#[derive(Clone)]
pub struct IngestService {
    objects: Arc<dyn ObjectStore>,
    labels: Arc<dyn LabelDetector>,
    documents: Arc<dyn DocumentStore>,

    /// Root directory under which objects are downloaded.
    scratch_root: PathBuf,

    /// Collection image records are written to.
    collection: String,
}

impl IngestService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        labels: Arc<dyn LabelDetector>,
        documents: Arc<dyn DocumentStore>,
        scratch_root: impl Into<PathBuf>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            labels,
            documents,
            scratch_root: scratch_root.into(),
            collection: collection.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    /// Run the pipeline for one finalized object.
    pub async fn handle(&self, object: &StorageObject) -> IngestResult<IngestOutcome> {
        let naming = DerivedNaming::derive(&object.name, &self.scratch_root);

        match skip_reason(object.content_type.as_deref()) {
            Some(SkipReason::AlreadyJpeg) => {
                info!("Already a JPEG.");
                return Ok(IngestOutcome::Skipped {
                    reason: SkipReason::AlreadyJpeg,
                });
            }
            Some(reason) => {
                info!("This is not an image.");
                return Ok(IngestOutcome::Skipped { reason });
            }
            None => {}
        }

        self.download(object, &naming.scratch_path).await?;
        info!(
            "The file has been downloaded to {}",
            naming.scratch_path.display()
        );

        let annotations = self.labels.detect_labels(&naming.scratch_path).await?;
        for label in &annotations {
            info!("Label detection result: {}", label.description);
        }

        let record = ImageRecord::new(naming.converted_name.clone(), annotations);
        self.documents
            .set(&self.collection, &naming.converted_name, &record.to_document())
            .await?;

        // No conversion or upload takes place; the converted name only keys the record.
        info!(
            "JPEG image created at {}",
            naming.scratch_converted_path.display()
        );
        info!("JPEG image uploaded to Storage at {}", naming.converted_name);

        fs::remove_file(&naming.scratch_path)
            .await
            .map_err(|source| IngestError::Cleanup {
                path: naming.scratch_path.clone(),
                source,
            })?;

        Ok(IngestOutcome::Processed {
            document_id: naming.converted_name,
            labels: record.information,
        })
    }

    /// Stream the object into `destination`.
    ///
    /// - Creates the scratch directory if needed.
    /// - Writes into a hidden temporary file, hashing while streaming.
    /// - Checks size and MD5 against the event metadata when present.
    /// - Renames into place; the temporary file is removed on any error.
    async fn download(&self, object: &StorageObject, destination: &Path) -> IngestResult<()> {
        ensure_key_safe(&object.name)?;

        let parent = destination
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| IngestError::InvalidObjectKey(object.name.clone()))?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|source| IngestError::Scratch {
                path: parent.clone(),
                source,
            })?;

        let stream = self.objects.open(&object.bucket, &object.name).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let downloaded = match write_stream(stream, &tmp_path).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = verify(object, &downloaded) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(source) = fs::rename(&tmp_path, destination).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(IngestError::Scratch {
                path: destination.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

async fn write_stream(mut stream: ObjectStream, path: &Path) -> IngestResult<Downloaded> {
    let scratch_err = |source: io::Error| IngestError::Scratch {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).await.map_err(scratch_err)?;
    let mut size_bytes: u64 = 0;
    let mut digest = md5::Context::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ObjectStoreError::Io)?;
        size_bytes += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await.map_err(scratch_err)?;
    }
    file.flush().await.map_err(scratch_err)?;
    file.sync_all().await.map_err(scratch_err)?;

    Ok(Downloaded {
        size_bytes,
        md5: digest.compute().0,
    })
}

fn verify(object: &StorageObject, downloaded: &Downloaded) -> IngestResult<()> {
    if let Some(expected) = object.size_bytes() {
        if expected != downloaded.size_bytes {
            return Err(IngestError::IntegrityMismatch {
                key: object.name.clone(),
                detail: format!(
                    "expected {} bytes, received {}",
                    expected, downloaded.size_bytes
                ),
            });
        }
    }
    if let Some(expected) = object.md5_digest() {
        if expected != downloaded.md5 {
            return Err(IngestError::IntegrityMismatch {
                key: object.name.clone(),
                detail: "md5 digest differs".into(),
            });
        }
    }
    Ok(())
}

/// Reject keys that would land outside the scratch root.
fn ensure_key_safe(key: &str) -> IngestResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key.bytes().any(|b| b.is_ascii_control());
    if invalid {
        return Err(IngestError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}
