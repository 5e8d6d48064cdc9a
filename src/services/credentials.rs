//! Bearer tokens for Google APIs.

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Token endpoint of the metadata server available on Google-managed runtimes.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server-reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata server returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// A metadata-server token and the instant it stops being reused.
pub struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Where outgoing requests get their credentials from.
pub enum TokenSource {
    /// No `Authorization` header (emulators, API-key access).
    Anonymous,
    /// A fixed token supplied through configuration.
    Static(String),
    /// The runtime's default service account via the metadata server.
    MetadataServer {
        client: Client,
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn metadata_server(client: Client) -> Self {
        Self::metadata_server_at(client, METADATA_TOKEN_URL)
    }

    pub fn metadata_server_at(client: Client, url: impl Into<String>) -> Self {
        Self::MetadataServer {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<Option<String>, CredentialsError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::MetadataServer {
                client,
                url,
                cached,
            } => {
                let mut guard = cached.lock().await;
                if let Some(token) = guard.as_ref() {
                    if token.expires_at > Utc::now() {
                        return Ok(Some(token.value.clone()));
                    }
                }

                debug!("fetching access token from {}", url);
                let response = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(CredentialsError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }

                let body: TokenResponse = response.json().await?;
                let lifetime = (body.expires_in - EXPIRY_MARGIN_SECS).max(0);
                *guard = Some(CachedToken {
                    value: body.access_token.clone(),
                    expires_at: Utc::now() + TimeDelta::seconds(lifetime),
                });
                Ok(Some(body.access_token))
            }
        }
    }

    /// Attach the current token, if any, to `request`.
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CredentialsError> {
        Ok(match self.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_and_static_sources() {
        assert_eq!(TokenSource::Anonymous.token().await.unwrap(), None);
        assert_eq!(
            TokenSource::Static("abc".into()).token().await.unwrap(),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn metadata_token_is_cached_until_expiry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.token","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let source =
            TokenSource::metadata_server_at(Client::new(), format!("{}/token", server.url()));
        assert_eq!(source.token().await.unwrap().as_deref(), Some("ya29.token"));
        assert_eq!(source.token().await.unwrap().as_deref(), Some("ya29.token"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn short_lived_tokens_are_refetched() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"short","expires_in":30}"#)
            .expect(2)
            .create_async()
            .await;

        let source =
            TokenSource::metadata_server_at(Client::new(), format!("{}/token", server.url()));
        source.token().await.unwrap();
        source.token().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn metadata_errors_surface_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/token")
            .with_status(404)
            .with_body("no service account")
            .create_async()
            .await;

        let source =
            TokenSource::metadata_server_at(Client::new(), format!("{}/token", server.url()));
        match source.token().await {
            Err(CredentialsError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "no service account");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
