//! Label detection through the Cloud Vision `images:annotate` endpoint.

use crate::{
    models::label::LabelAnnotation,
    services::credentials::{CredentialsError, TokenSource},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

const LABEL_DETECTION: &str = "LABEL_DETECTION";

#[derive(Debug, Error)]
pub enum LabelDetectionError {
    #[error("could not read image `{}`: {source}", path.display())]
    ReadImage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("vision API could not annotate the image (code {code}): {message}")]
    Image { code: i32, message: String },
    #[error("vision API returned no result for the image")]
    EmptyResponse,
}

#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Labels for the image at `path`, in the order the service ranks them.
    async fn detect_labels(&self, path: &Path) -> Result<Vec<LabelAnnotation>, LabelDetectionError>;
}

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: [AnnotateImageRequest<'a>; 1],
}

#[derive(Serialize)]
struct AnnotateImageRequest<'a> {
    image: ImageContent,
    features: [Feature<'a>; 1],
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature<'a> {
    #[serde(rename = "type")]
    feature_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RpcStatus,
}

/// Cloud Vision client. Authenticates with a bearer token, an API key, or both.
pub struct CloudVisionClient {
    client: Client,
    endpoint: String,
    tokens: Arc<TokenSource>,
    api_key: Option<String>,
    max_results: Option<u32>,
}

impl CloudVisionClient {
    pub fn new(client: Client, endpoint: impl Into<String>, tokens: Arc<TokenSource>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            tokens,
            api_key: None,
            max_results: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Cap on labels per image. `None` leaves the service default in place.
    pub fn with_max_results(mut self, max_results: Option<u32>) -> Self {
        self.max_results = max_results;
        self
    }

    fn annotate_url(&self) -> String {
        format!("{}/v1/images:annotate", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl LabelDetector for CloudVisionClient {
    async fn detect_labels(&self, path: &Path) -> Result<Vec<LabelAnnotation>, LabelDetectionError> {
        let bytes = fs::read(path)
            .await
            .map_err(|source| LabelDetectionError::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("annotating {} ({} bytes)", path.display(), bytes.len());

        let body = AnnotateRequest {
            requests: [AnnotateImageRequest {
                image: ImageContent {
                    content: general_purpose::STANDARD.encode(&bytes),
                },
                features: [Feature {
                    feature_type: LABEL_DETECTION,
                    max_results: self.max_results,
                }],
            }],
        };

        let mut request = self.client.post(self.annotate_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        let response = self.tokens.authorize(request).await?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(LabelDetectionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AnnotateResponse = response.json().await?;
        let result = parsed
            .responses
            .into_iter()
            .next()
            .ok_or(LabelDetectionError::EmptyResponse)?;

        if let Some(error) = result.error {
            return Err(LabelDetectionError::Image {
                code: error.code,
                message: error.message,
            });
        }

        Ok(result.label_annotations)
    }
}
