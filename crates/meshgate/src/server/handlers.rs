//! management api handlers.
//!
//! endpoints:
//! - `GET /clients` - unified client list
//! - `GET /clients/{id}` - one client with annotated rules
//! - `GET /clients/{id}/reach` - effective reachability around a client
//! - `GET /clients/{id}/targets` - clients eligible as rule targets
//! - `PUT /clients/{id}/acl` - replace mode and rules (not enforced yet)
//! - `POST /clients/{id}/acl/{target}/toggle` - flip a rule's bidirectional flag
//! - `PUT /clients/{id}/dns` - toggle dns rewriting
//! - `POST /sync` - refresh clients from the backends
//! - `POST /apply` - push the stored policy to enforcement
//! - `GET /apply/preview` - documents an apply would submit
//! - `GET /status` - sync, apply and capability status
//! - `PUT /capabilities/bridge` - record whether the cross-network router is up
//! - `POST /events/topology` - a backend saw its peer list change

// axum handlers are async even when they never await
#![allow(clippy::unused_async)]

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use meshgate_core::{
    AclRule, ApplyStatus, Backend, Capabilities, ClientDetail, ClientId, ClientView,
    EnforcementDocument, EngineStatus, PolicyMode, ReachView, SyncReport,
};

use super::AppState;
use super::error::{ApiError, OptionExt};

/// set on acl writes: the change is stored but not yet enforced
pub const PENDING_HEADER: HeaderName = HeaderName::from_static("x-meshgate-pending");

fn client_id(raw: &str) -> Result<ClientId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("'{raw}' is not a client id")))
}

// ── Reads ───────────────────────────────────────────────────────────

pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientView>> {
    Json(state.engine.client_views())
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientDetail>, ApiError> {
    let id = client_id(&id)?;
    Ok(Json(state.engine.client_detail(&id)?))
}

pub async fn get_reach(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReachView>, ApiError> {
    let id = client_id(&id)?;
    Ok(Json(state.engine.reach(&id)?))
}

pub async fn get_targets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ClientView>>, ApiError> {
    let id = client_id(&id)?;
    let targets = state.engine.selectable_targets(&id)?;
    Ok(Json(
        targets.iter().map(|c| ClientView::from(c.as_ref())).collect(),
    ))
}

pub async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

pub async fn preview(State(state): State<AppState>) -> Json<Vec<EnforcementDocument>> {
    Json(state.engine.preview())
}

// ── Policy writes ───────────────────────────────────────────────────

/// body of `PUT /clients/{id}/acl`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRequest {
    pub policy: String,
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

pub async fn put_acl(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AclRequest>,
) -> Result<Response, ApiError> {
    let id = client_id(&id)?;
    let mode: PolicyMode = req.policy.parse()?;
    state.engine.set_acl(&id, mode, req.rules).await?;
    debug!(client = %id, %mode, "acl stored");

    let pending = state.engine.apply_status().pending_changes;
    Ok((
        StatusCode::NO_CONTENT,
        [(PENDING_HEADER, HeaderValue::from_static(if pending { "true" } else { "false" }))],
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub bidirectional: bool,
}

pub async fn toggle_rule(
    State(state): State<AppState>,
    Path((id, target)): Path<(String, String)>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let owner = client_id(&id)?;
    let target = client_id(&target)?;
    let bidirectional = state
        .engine
        .toggle_bidirectional(&owner, &target)
        .await?
        .or_not_found("no rule for that target")?;
    Ok(Json(ToggleResponse { bidirectional }))
}

#[derive(Debug, Deserialize)]
pub struct DnsRequest {
    pub enabled: bool,
}

pub async fn put_dns(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DnsRequest>,
) -> Result<Json<ClientView>, ApiError> {
    let id = client_id(&id)?;
    let client = state.engine.set_dns(&id, req.enabled).await?;
    Ok(Json(ClientView::from(client.as_ref())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub available: bool,
}

pub async fn put_bridge(
    State(state): State<AppState>,
    Json(req): Json<BridgeRequest>,
) -> Json<Capabilities> {
    state.engine.set_bridge_available(req.available);
    Json(state.engine.capabilities())
}

// ── External I/O ────────────────────────────────────────────────────

pub async fn sync(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.engine.sync().await?))
}

/// Always answers with the apply status so the caller sees `lastError`;
/// failures only change the status code.
pub async fn apply(State(state): State<AppState>) -> (StatusCode, Json<ApplyStatus>) {
    match state.engine.apply().await {
        Ok(status) => (StatusCode::OK, Json(status)),
        Err(e) => (ApiError::status_of(&e), Json(state.engine.apply_status())),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TopologyEvent {
    pub backend: Option<Backend>,
}

pub async fn topology_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event: TopologyEvent = if body.is_empty() {
        TopologyEvent::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid topology event: {e}")))?
    };
    state.engine.notify_topology_changed(event.backend);
    Ok(StatusCode::ACCEPTED)
}
