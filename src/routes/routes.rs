//! Defines routes for event intake and probes.
//!
//! ## Structure
//! - `POST /`        -> storage event (CloudEvents, binary or structured mode)
//! - `GET  /healthz` -> liveness
//! - `GET  /readyz`  -> readiness (document store + scratch disk)

use crate::{
    handlers::{
        event_handlers::receive_event,
        health_handlers::{healthz, readyz},
    },
    services::ingest_service::IngestService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router.
///
/// The router carries shared state (`IngestService`) to all handlers.
pub fn routes() -> Router<IngestService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // event intake
        .route("/", post(receive_event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        ingest_service::DEFAULT_COLLECTION,
        testing::{FakeDocumentStore, FakeLabelDetector, FakeObjectStore},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct App {
        router: Router,
        objects: Arc<FakeObjectStore>,
        documents: Arc<FakeDocumentStore>,
        _scratch: tempfile::TempDir,
    }

    fn app() -> App {
        let objects = Arc::new(FakeObjectStore::default());
        let documents = Arc::new(FakeDocumentStore::default());
        let scratch = tempfile::tempdir().unwrap();
        let service = IngestService::new(
            objects.clone(),
            Arc::new(FakeLabelDetector::returning(&[("Cat", 0.9), ("Pet", 0.8)])),
            documents.clone(),
            scratch.path(),
            DEFAULT_COLLECTION,
        );
        App {
            router: routes().with_state(service),
            objects,
            documents,
            _scratch: scratch,
        }
    }

    fn finalize(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .header("ce-id", "1234")
            .header("ce-type", "google.cloud.storage.object.v1.finalized")
            .header("ce-source", "//storage.googleapis.com/projects/_/buckets/my-bucket")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn png_event_is_processed() {
        let app = app();
        app.objects.insert("my-bucket", "photos/dog.png", b"png-bytes");

        let response = app
            .router
            .oneshot(finalize(json!({
                "bucket": "my-bucket",
                "name": "photos/dog.png",
                "contentType": "image/png"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "status": "processed",
                "documentId": "photos/dog_converted.jpg",
                "labels": ["Cat", "Pet"]
            })
        );
        assert_eq!(app.documents.writes().len(), 1);
    }

    #[tokio::test]
    async fn text_event_is_skipped() {
        let app = app();
        let response = app
            .router
            .oneshot(finalize(json!({
                "bucket": "my-bucket",
                "name": "docs/readme.txt",
                "contentType": "text/plain"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "skipped", "reason": "not_an_image" })
        );
        assert!(app.objects.calls().is_empty());
    }

    #[tokio::test]
    async fn other_event_types_are_acknowledged_without_work() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("ce-type", "google.cloud.storage.object.v1.deleted")
            .body(Body::from(
                json!({ "bucket": "my-bucket", "name": "dog.png", "contentType": "image/png" })
                    .to_string(),
            ))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "status": "skipped", "reason": "unsupported_event_type" })
        );
        assert!(app.objects.calls().is_empty());
    }

    #[tokio::test]
    async fn dependency_failure_is_bad_gateway() {
        let app = app();
        let response = app
            .router
            .oneshot(finalize(json!({
                "bucket": "my-bucket",
                "name": "photos/missing.png",
                "contentType": "image/png"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["status"], 502);
        assert!(body["error"].as_str().unwrap().contains("photos/missing.png"));
        assert!(app.documents.writes().is_empty());
    }

    #[tokio::test]
    async fn malformed_event_is_bad_request() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn probes_report_status() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router
            .clone()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["scratch"]["ok"], true);
        assert_eq!(body["checks"]["documents"]["ok"], true);

        app.documents.fail_writes();
        let response = app
            .router
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
