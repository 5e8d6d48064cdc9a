//! HTTP intake for storage events.
//! Accepts CloudEvents in binary or structured content mode and delegates
//! the actual work to `IngestService`.

use crate::{
    errors::AppError,
    models::event::{EventContext, StorageEvent},
    services::ingest_service::{IngestOutcome, IngestService, SkipReason},
};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header},
};
use tracing::{Instrument, debug, error, info, info_span};

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// POST `/`: handle one storage notification.
pub async fn receive_event(
    State(service): State<IngestService>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestOutcome>, AppError> {
    let event = parse_event(&headers, &body)?;

    let span = info_span!(
        "storage_event",
        id = event.context.id.as_deref().unwrap_or("-"),
        bucket = %event.object.bucket,
        key = %event.object.name,
    );

    async move {
        debug!(
            "event source {:?}, subject {:?}",
            event.context.source, event.context.subject
        );
        if !event.context.is_finalize() {
            info!(
                "ignoring event type {}",
                event.context.event_type.as_deref().unwrap_or_default()
            );
            return Ok(Json(IngestOutcome::Skipped {
                reason: SkipReason::UnsupportedEventType,
            }));
        }

        match service.handle(&event.object).await {
            Ok(outcome) => Ok(Json(outcome)),
            Err(err) => {
                error!("invocation failed: {}", err);
                Err(AppError::from(err))
            }
        }
    }
    .instrument(span)
    .await
}

fn parse_event(headers: &HeaderMap, body: &[u8]) -> Result<StorageEvent, AppError> {
    let structured = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(STRUCTURED_CONTENT_TYPE));

    let event = if structured {
        StorageEvent::structured(body)?
    } else {
        StorageEvent::binary(context_from_headers(headers), body)?
    };
    Ok(event)
}

fn context_from_headers(headers: &HeaderMap) -> EventContext {
    let attr = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    EventContext {
        id: attr("ce-id"),
        event_type: attr("ce-type"),
        source: attr("ce-source"),
        subject: attr("ce-subject"),
    }
}
