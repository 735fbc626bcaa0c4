//! API Handlers

use crate::calltree::{resolve_call_tree, ResolvedContact};
use crate::error::{AlarmError, Result};
use crate::incident::{AlarmIncident, IncidentService};
use crate::subsystem::model::AlarmSubsystemModel;
use crate::subsystem::{AlarmStatus, RequestBody, SubsystemEvent};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use haven_model::{Address, AttributeMap};
use haven_place::PlaceId;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Arm request payload
#[derive(Debug, Deserialize)]
pub struct ArmRequest {
    pub mode: String,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "alarmsrv" }))
}

pub async fn register_place(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Value>> {
    state.register_place(place)?;
    Ok(Json(json!({ "place": place })))
}

pub async fn status(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<AlarmStatus>> {
    Ok(Json(state.subsystem.status(place)?))
}

pub async fn arm(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
    Json(body): Json<ArmRequest>,
) -> Result<Json<Value>> {
    send_request(&state, place, RequestBody::Arm { mode: body.mode }).await
}

pub async fn arm_bypassed(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
    Json(body): Json<ArmRequest>,
) -> Result<Json<Value>> {
    send_request(&state, place, RequestBody::ArmBypassed { mode: body.mode }).await
}

pub async fn disarm(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Value>> {
    send_request(&state, place, RequestBody::Disarm).await
}

pub async fn panic(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Value>> {
    send_request(&state, place, RequestBody::Panic).await
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Value>> {
    send_request(&state, place, RequestBody::Cancel).await
}

pub async fn incident(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Option<AlarmIncident>>> {
    // 404 for unknown places, null for "no open incident"
    state.subsystem.status(place)?;
    Ok(Json(state.incidents.current(place).await))
}

pub async fn call_tree(
    State(state): State<AppState>,
    Path(place): Path<PlaceId>,
) -> Result<Json<Vec<ResolvedContact>>> {
    let address = AlarmSubsystemModel::address_for(place);
    let model = state
        .store
        .get(&address)
        .ok_or(AlarmError::UnknownPlace(place))?;
    let view = AlarmSubsystemModel::new(place, model);
    Ok(Json(resolve_call_tree(state.store.as_ref(), &view)))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path((place, address)): Path<(PlaceId, String)>,
    Json(update): Json<AttributeMap>,
) -> Result<Json<Value>> {
    let address: Address = address
        .parse()
        .map_err(|_| AlarmError::InvalidRequest(format!("invalid address {address}")))?;
    state.apply_device_change(place, &address, update)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// Enqueue a request through the place's actor and await its outcome
///
/// Unknown places are rejected up front: dispatching would create a mailbox
/// for them, and nothing ever reaps mailboxes of places that were never
/// registered.
async fn send_request(state: &AppState, place: PlaceId, body: RequestBody) -> Result<Json<Value>> {
    if state
        .store
        .get(&AlarmSubsystemModel::address_for(place))
        .is_none()
    {
        return Err(AlarmError::UnknownPlace(place));
    }
    let (tx, rx) = oneshot::channel();
    state.registry.dispatch(
        place,
        SubsystemEvent::Request {
            body,
            reply: Some(tx),
        },
    );
    rx.await
        .map_err(|_| AlarmError::Internal("alarm actor dropped the reply".to_string()))??;
    Ok(Json(json!({ "status": "ok" })))
}
