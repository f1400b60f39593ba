//! Control endpoints under `/_edge`.
//!
//! These are how host windows talk to the edge: sync triggers, lifecycle
//! commands, connectivity hints, push delivery and notification clicks.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use eatech_core::push::{Notification, NotificationClick};
use eatech_core::{ClientId, Connectivity, HostCommand, QueueClass, QueueEntry, SyncTag, WorkerState};

use crate::db::{DeadLetter, DeliveryAttempts, PushSubscription, QueueStore, SubscriptionStore};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::lifecycle::CommandOutcome;
use crate::push::{ClickOutcome, ClientInfo, ClientRegistry, NotificationSink};
use crate::state::AppState;
use crate::sync::SyncReport;

/// Snapshot of the edge for host dashboards.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStatus {
    pub lifecycle: WorkerState,
    pub version: String,
    pub connectivity: Connectivity,
    pub caches: Vec<String>,
    pub queues: Vec<QueueStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub class: QueueClass,
    pub pending: u64,
}

/// `GET /_edge/health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let runtime = state.runtime();
    Json(json!({
        "status": "ok",
        "lifecycle": runtime.lifecycle().state(),
        "connectivity": runtime.connectivity().current(),
    }))
}

/// `GET /_edge/state`
pub async fn status(State(state): State<AppState>) -> Result<Json<EdgeStatus>> {
    let runtime = state.runtime();
    let counts = QueueStore::new(runtime.pool()).counts().await?;

    Ok(Json(EdgeStatus {
        lifecycle: runtime.lifecycle().state(),
        version: runtime.lifecycle().names().version().to_string(),
        connectivity: runtime.connectivity().current(),
        caches: runtime.storage().keys().await,
        queues: counts
            .into_iter()
            .map(|(class, pending)| QueueStatus { class, pending })
            .collect(),
    }))
}

/// `POST /_edge/sync/{tag}`
pub async fn sync_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<SyncReport>> {
    let tag: SyncTag = tag.parse()?;
    let name = tag.to_string();
    add_breadcrumb("sync", "Sync requested", Some(&[("tag", name.as_str())]));
    let report = state.runtime().coordinator().sync(tag).await?;
    Ok(Json(report))
}

/// `POST /_edge/sync`
pub async fn sync_all(State(state): State<AppState>) -> Result<Json<Vec<SyncReport>>> {
    Ok(Json(state.runtime().coordinator().sync_all().await?))
}

/// `POST /_edge/message`
pub async fn message(State(state): State<AppState>, body: Bytes) -> Result<Json<CommandOutcome>> {
    let command: HostCommand = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("unknown message: {e}")))?;
    add_breadcrumb("lifecycle", "Host message", None);
    Ok(Json(state.runtime().lifecycle().handle_command(command).await?))
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityUpdate {
    pub online: bool,
}

/// `POST /_edge/connectivity`
pub async fn connectivity(
    State(state): State<AppState>,
    Json(update): Json<ConnectivityUpdate>,
) -> Json<serde_json::Value> {
    let next = Connectivity::from_online(update.online);
    let changed = state.runtime().connectivity().set(next);
    Json(json!({ "connectivity": next, "changed": changed }))
}

/// `POST /_edge/push`
pub async fn push(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Notification>)> {
    let notification = state.runtime().push().handle_push(&body)?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// `GET /_edge/notifications`
pub async fn notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.runtime().notifications().visible())
}

/// `POST /_edge/notifications/click`
pub async fn notification_click(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClickOutcome>> {
    let click: NotificationClick = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed click: {e}")))?;
    Ok(Json(state.runtime().push().handle_click(&click)))
}

#[derive(Debug, Deserialize)]
pub struct ClientRegistration {
    #[serde(default)]
    pub id: Option<ClientId>,
    pub url: String,
}

/// `POST /_edge/clients`
pub async fn register_client(
    State(state): State<AppState>,
    Json(registration): Json<ClientRegistration>,
) -> Json<ClientInfo> {
    Json(
        state
            .runtime()
            .clients()
            .register(registration.id, &registration.url),
    )
}

/// `DELETE /_edge/clients/{id}`
pub async fn unregister_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.runtime().clients().unregister(&ClientId::new(id.as_str())) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("no client {id}")))
    }
}

/// `GET /_edge/clients`
pub async fn clients(State(state): State<AppState>) -> Json<Vec<ClientInfo>> {
    Json(state.runtime().clients().list())
}

/// `GET /_edge/subscription`
pub async fn subscription(State(state): State<AppState>) -> Result<Json<PushSubscription>> {
    SubscriptionStore::new(state.pool())
        .current()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no push subscription".to_string()))
}

/// `PUT /_edge/subscription`
pub async fn save_subscription(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PushSubscription>> {
    let subscription: PushSubscription = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed subscription: {e}")))?;
    SubscriptionStore::new(state.pool()).save(&subscription).await?;
    Ok(Json(subscription))
}

/// `DELETE /_edge/subscription`
pub async fn delete_subscription(State(state): State<AppState>) -> Result<impl IntoResponse> {
    if SubscriptionStore::new(state.pool()).clear().await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("no push subscription".to_string()))
    }
}

/// `GET /_edge/queue/{class}`
pub async fn queue(
    State(state): State<AppState>,
    Path(class): Path<String>,
) -> Result<Json<Vec<QueueEntry>>> {
    let class: QueueClass = class.parse()?;
    Ok(Json(QueueStore::new(state.pool()).list_all(class).await?))
}

/// `GET /_edge/queue/{class}/dead-letters`
pub async fn dead_letters(
    State(state): State<AppState>,
    Path(class): Path<String>,
) -> Result<Json<Vec<DeadLetter>>> {
    let class: QueueClass = class.parse()?;
    Ok(Json(
        DeliveryAttempts::new(state.pool())
            .dead_letters(Some(class))
            .await?,
    ))
}
