//! Storage notifications delivered as CloudEvents.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CloudEvent type emitted when a new object (or a new generation of one)
/// is written to a bucket.
pub const FINALIZED_EVENT_TYPE: &str = "google.cloud.storage.object.v1.finalized";

/// Metadata of the object that triggered an invocation.
///
/// Mirrors the storage object resource carried as the event payload. Only
/// `bucket`, `name` and `contentType` drive the pipeline; the remaining
/// fields are used to verify the download when present.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Bucket the object lives in.
    pub bucket: String,

    /// Full object key, e.g. `photos/2025/dog.png`.
    pub name: String,

    /// Declared MIME type. Objects uploaded without one are never labelled.
    pub content_type: Option<String>,

    /// Object size in bytes, encoded as a decimal string.
    pub size: Option<String>,

    /// Base64-encoded MD5 digest of the object payload.
    pub md5_hash: Option<String>,

    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl StorageObject {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }

    /// Decoded MD5 digest, if the notification carried a well-formed one.
    pub fn md5_digest(&self) -> Option<[u8; 16]> {
        let encoded = self.md5_hash.as_deref()?;
        general_purpose::STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
    }
}

/// CloudEvent attributes, taken from `ce-*` headers (binary mode) or from the
/// envelope (structured mode). All optional so direct invocations work too.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    pub id: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub subject: Option<String>,
}

impl EventContext {
    /// A missing type is treated as a finalize notification.
    pub fn is_finalize(&self) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|ty| ty == FINALIZED_EVENT_TYPE)
    }
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("event payload has an empty object name")]
    EmptyObjectName,
}

/// One storage notification: attributes plus the object it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub context: EventContext,
    pub object: StorageObject,
}

#[derive(Deserialize)]
struct StructuredEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    source: Option<String>,
    subject: Option<String>,
    data: StorageObject,
}

impl StorageEvent {
    /// Binary content mode: attributes arrived as headers, body is the object.
    pub fn binary(context: EventContext, body: &[u8]) -> Result<Self, EventParseError> {
        let object: StorageObject = serde_json::from_slice(body)?;
        Self::checked(context, object)
    }

    /// Structured content mode (`application/cloudevents+json`).
    pub fn structured(body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: StructuredEnvelope = serde_json::from_slice(body)?;
        let context = EventContext {
            id: envelope.id,
            event_type: envelope.event_type,
            source: envelope.source,
            subject: envelope.subject,
        };
        Self::checked(context, envelope.data)
    }

    fn checked(context: EventContext, object: StorageObject) -> Result<Self, EventParseError> {
        if object.name.is_empty() {
            return Err(EventParseError::EmptyObjectName);
        }
        Ok(Self { context, object })
    }
}
