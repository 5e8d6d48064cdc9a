//! In-memory collaborators that record every call.

use crate::{
    models::label::{Document, LabelAnnotation},
    services::{
        document_store::{DocumentStore, DocumentStoreError},
        label_detector::{LabelDetectionError, LabelDetector},
        object_store::{ObjectStore, ObjectStoreError, ObjectStream},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeObjectStore {
    pub fn insert(&self, bucket: &str, key: &str, payload: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), payload.to_vec());
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));

        let payload = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        // Two chunks, so the download loop sees more than one.
        let mid = payload.len() / 2;
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&payload[..mid])),
            Ok(Bytes::copy_from_slice(&payload[mid..])),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Returns fixed labels and records `(path, file contents)` per call.
pub struct FakeLabelDetector {
    labels: Vec<LabelAnnotation>,
    calls: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    delete_input: AtomicBool,
}

impl FakeLabelDetector {
    pub fn returning(labels: &[(&str, f32)]) -> Self {
        Self {
            labels: labels
                .iter()
                .map(|(description, score)| LabelAnnotation {
                    mid: None,
                    description: description.to_string(),
                    score: *score,
                    topicality: *score,
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
            delete_input: AtomicBool::new(false),
        }
    }

    /// Remove the image after reading it, so the pipeline's cleanup fails.
    pub fn delete_input_after_reading(&self) {
        self.delete_input.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelDetector for FakeLabelDetector {
    async fn detect_labels(&self, path: &Path) -> Result<Vec<LabelAnnotation>, LabelDetectionError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|source| LabelDetectionError::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), contents));

        if self.delete_input.load(Ordering::SeqCst) {
            let _ = tokio::fs::remove_file(path).await;
        }
        Ok(self.labels.clone())
    }
}

pub struct FailingLabelDetector;

#[async_trait]
impl LabelDetector for FailingLabelDetector {
    async fn detect_labels(&self, _path: &Path) -> Result<Vec<LabelAnnotation>, LabelDetectionError> {
        Err(LabelDetectionError::Api {
            status: 429,
            message: "Quota exceeded".into(),
        })
    }
}

#[derive(Default)]
pub struct FakeDocumentStore {
    writes: Mutex<Vec<(String, String, Document)>>,
    fail: AtomicBool,
}

impl FakeDocumentStore {
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(String, String, Document)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn set(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), DocumentStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.writes.lock().unwrap().push((
            collection.to_string(),
            id.to_string(),
            document.clone(),
        ));
        Ok(())
    }

    async fn ping(&self) -> Result<(), DocumentStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(())
    }
}
