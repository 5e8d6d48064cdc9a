//! Document persistence: Firestore over REST, or SQLite for local runs.
//!
//! Both backends implement `set` as a full replace keyed by document id,
//! creating the document when it does not exist yet.

use crate::{
    models::label::Document,
    services::credentials::{CredentialsError, TokenSource},
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("firestore endpoint `{0}` cannot carry a path")]
    InvalidEndpoint(String),
    #[error("firestore returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or fully replace `collection/id` with `document`.
    async fn set(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), DocumentStoreError>;

    /// Cheap connectivity check used by the readiness probe.
    async fn ping(&self) -> Result<(), DocumentStoreError> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Firestore REST client.
///
/// Writes use `PATCH` without an update mask, which replaces every field of
/// the stored document.
pub struct FirestoreClient {
    client: Client,
    endpoint: Url,
    project_id: String,
    database_id: String,
    tokens: Arc<TokenSource>,
}

impl FirestoreClient {
    pub fn new(
        client: Client,
        endpoint: Url,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
        tokens: Arc<TokenSource>,
    ) -> Self {
        Self {
            client,
            endpoint,
            project_id: project_id.into(),
            database_id: database_id.into(),
            tokens,
        }
    }

    /// `id` is split on `/` the way a client SDK resolves a document path,
    /// so ids containing slashes address nested paths.
    fn document_url(&self, collection: &str, id: &str) -> Result<Url, DocumentStoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| DocumentStoreError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "databases",
                self.database_id.as_str(),
                "documents",
            ])
            .extend(collection.split('/'))
            .extend(id.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn set(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), DocumentStoreError> {
        let url = self.document_url(collection, id)?;
        debug!("PATCH {}", url);

        let body = json!({ "fields": encode_fields(document) });
        let request = self.tokens.authorize(self.client.patch(url).json(&body)).await?;
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(DocumentStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

fn encode_fields(document: &Document) -> Map<String, Value> {
    document
        .iter()
        .map(|(name, value)| (name.clone(), encode_value(value)))
        .collect()
}

/// Convert plain JSON into Firestore's typed value representation.
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // int64 travels as a decimal string
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

/// Documents kept as JSON text in a single SQLite table.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Arc<SqlitePool>,
}

impl SqliteDocumentStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn set(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), DocumentStoreError> {
        let body = serde_json::to_string(document)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), DocumentStoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Run every `;`-separated statement of a migration script.
pub async fn apply_migration(db: &SqlitePool, sql: &str) -> Result<usize, sqlx::Error> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in statements.iter().copied() {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(statements.len())
}
