//! Fallback handler: every request outside `/_edge` is answered by the edge
//! on behalf of the upstream.
//!
//! `POST`s to the three mutation endpoints go through the outbox, so they are
//! queued instead of failing while offline. Everything else goes through the
//! cache router.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use url::Url;

use eatech_core::request::{RequestDestination, RequestMode};
use eatech_core::{EntryId, Payload, QueueClass, QueueEntry};

use crate::error::{AppError, Result};
use crate::net::FetchRequest;
use crate::state::AppState;
use crate::sync::{IDEMPOTENCY_KEY, SubmitOutcome};

/// Largest request body the edge will buffer.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Answer a proxied request.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("cannot read body: {e}")))?;

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = state
        .runtime()
        .upstream()
        .url_for(path_and_query)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if parts.method == Method::POST
        && let Some(class) = QueueClass::for_endpoint(parts.uri.path())
    {
        return submit(&state, class, &parts.headers, &body).await;
    }

    let request = fetch_request(parts.method, url, parts.headers, body);
    Ok(state.runtime().router().handle(request).await.into_response())
}

/// Build the upstream request, lifting fetch metadata out of the headers.
fn fetch_request(method: Method, url: Url, mut headers: HeaderMap, body: Bytes) -> FetchRequest {
    let destination = headers
        .get(SEC_FETCH_DEST)
        .and_then(|v| v.to_str().ok())
        .map_or(RequestDestination::Empty, RequestDestination::from_header);
    let mode = headers
        .get(SEC_FETCH_MODE)
        .and_then(|v| v.to_str().ok())
        .map_or(RequestMode::Cors, RequestMode::from_header);
    headers.remove(header::HOST);

    FetchRequest {
        method,
        url,
        headers,
        body,
        destination,
        mode,
    }
}

/// Validate a mutation and hand it to the outbox.
async fn submit(
    state: &AppState,
    class: QueueClass,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response> {
    let payload = Payload::parse(class, body)?;
    let entry = match idempotency_key(headers)? {
        Some(id) => QueueEntry::with_id(id, payload),
        None => QueueEntry::new(payload),
    };

    match state.runtime().outbox().submit(entry).await? {
        SubmitOutcome::Delivered(response) => Ok(response.into_response()),
        SubmitOutcome::Queued(entry) => {
            tracing::info!(queue = %class, entry_id = %entry.id, "Mutation queued for sync");
            let body = json!({
                "queued": true,
                "queue": class,
                "id": entry.id,
            });
            Ok((
                StatusCode::ACCEPTED,
                [(header::CONTENT_TYPE, "application/json")],
                Body::from(body.to_string()),
            )
                .into_response())
        }
    }
}

/// A caller-chosen entry ID, so a retried submission is not queued twice.
fn idempotency_key(headers: &HeaderMap) -> Result<Option<EntryId>> {
    let Some(value) = headers.get(&IDEMPOTENCY_KEY) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|key| !key.is_empty() && key.len() <= 128)
        .ok_or_else(|| AppError::BadRequest("invalid Idempotency-Key header".to_string()))?;
    Ok(Some(EntryId::new(key)))
}
