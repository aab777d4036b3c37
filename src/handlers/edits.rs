//! Edit-scenario message handlers: list/create/delete, delta reload,
//! stop moves, and timeline reorders.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{respond_error, AppState};
use crate::services::plans::resolve_params;
use crate::types::{
    AckResponse, EditCreateRequest, EditListResponse, EditReloadRequest, EditReloadResponse,
    EditRequest, ErrorResponse, ProjectRequest, ReorderRequest, Request, StopMoveRequest,
    SuccessResponse,
};

macro_rules! parse_or_continue {
    ($client:expr, $msg:expr, $reply:expr, $ty:ty) => {
        match serde_json::from_slice::<Request<$ty>>(&$msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "BAD_INPUT", e.to_string());
                let _ = $client.publish($reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        }
    };
}

/// Handle edits.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, ProjectRequest);

        match state.store.list_edits(&request.payload.project_id) {
            Ok(edits) => {
                let success = SuccessResponse::new(request.id, EditListResponse { edits });
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}

/// Handle edits.create messages
pub async fn handle_create(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, EditCreateRequest);
        let payload = &request.payload;

        let lock = state.store.scenario_lock(&payload.project_id, &payload.edit_id);
        let _guard = lock.lock().await;
        match state.store.create_edit(
            &payload.project_id,
            &payload.edit_id,
            payload.source_edit_id.as_deref(),
        ) {
            Ok(()) => {
                info!(
                    project = payload.project_id.as_str(),
                    edit = payload.edit_id.as_str(),
                    "edit scenario created"
                );
                let success = SuccessResponse::new(
                    request.id,
                    AckResponse { message: format!("edit '{}' created", payload.edit_id) },
                );
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}

/// Handle edits.delete messages
pub async fn handle_delete(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, EditRequest);
        let payload = &request.payload;

        let lock = state.store.scenario_lock(&payload.project_id, &payload.edit_id);
        let _guard = lock.lock().await;
        match state.store.delete_edit(&payload.project_id, &payload.edit_id) {
            Ok(()) => {
                info!(
                    project = payload.project_id.as_str(),
                    edit = payload.edit_id.as_str(),
                    "edit scenario deleted"
                );
                let success = SuccessResponse::new(
                    request.id,
                    AckResponse { message: format!("edit '{}' deleted", payload.edit_id) },
                );
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}

/// Handle edit.reload messages: run the delta engine over one scenario.
pub async fn handle_reload(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received edit.reload message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, EditReloadRequest);
        let payload = &request.payload;

        let params = match resolve_params(&payload.params) {
            Ok(params) => params,
            Err(e) => {
                respond_error(&client, reply, request.id, &e).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        match state
            .delta
            .reload(&payload.project_id, &payload.edit_id, params, request.id)
            .await
        {
            Ok((_, stats)) => {
                info!(
                    project = payload.project_id.as_str(),
                    edit = payload.edit_id.as_str(),
                    regenerated = stats.regenerated,
                    reused = stats.reused,
                    deleted = stats.deleted,
                    failed = stats.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "edit reload finished"
                );
                if stats.failed > 0 {
                    // All queued work failing with nothing reused reads as
                    // the provider being down, not a partial outcome. The
                    // artifact was written either way.
                    let err = if stats.regenerated == 0 && stats.reused == 0 {
                        crate::error::PlanError::ProviderUnavailable(format!(
                            "all {} vehicles failed; artifact written",
                            stats.failed
                        ))
                    } else {
                        crate::error::PlanError::PartialMaterialization {
                            failed_vehicle_ids: stats.failed_vehicle_ids.clone(),
                        }
                    };
                    respond_error(&client, reply, request.id, &err).await;
                } else {
                    let success =
                        SuccessResponse::new(request.id, EditReloadResponse { stats });
                    let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
                }
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}

/// Handle edit.stop.move messages: update one stop's coordinates inside a
/// scenario. The next delta run regenerates affected vehicles through the
/// fingerprint change.
pub async fn handle_stop_move(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, StopMoveRequest);
        let payload = &request.payload;

        let lock = state.store.scenario_lock(&payload.project_id, &payload.edit_id);
        let _guard = lock.lock().await;
        match state.store.update_scenario_stop(
            &payload.project_id,
            &payload.edit_id,
            &payload.stop_id,
            payload.lon,
            payload.lat,
        ) {
            Ok(()) => {
                info!(
                    project = payload.project_id.as_str(),
                    edit = payload.edit_id.as_str(),
                    stop = payload.stop_id.as_str(),
                    "stop moved in scenario"
                );
                let success = SuccessResponse::new(
                    request.id,
                    AckResponse { message: format!("stop '{}' moved", payload.stop_id) },
                );
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}

/// Handle edit.reorder messages: persist a timeline reorder into the
/// tabular edit plan. No provider calls are made here.
pub async fn handle_reorder(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };
        let request = parse_or_continue!(client, msg, reply, ReorderRequest);
        let payload = &request.payload;

        let vehicles: Vec<(u32, Vec<String>)> = payload
            .vehicles
            .iter()
            .map(|v| (v.vehicle_id, v.stop_ids.clone()))
            .collect();

        let lock = state.store.scenario_lock(&payload.project_id, &payload.edit_id);
        let _guard = lock.lock().await;
        match state.store.reorder_edit_plan(&payload.project_id, &payload.edit_id, &vehicles) {
            Ok(()) => {
                info!(
                    project = payload.project_id.as_str(),
                    edit = payload.edit_id.as_str(),
                    vehicles = vehicles.len(),
                    "timeline reorder persisted"
                );
                let success = SuccessResponse::new(
                    request.id,
                    AckResponse { message: "edit plan updated".to_string() },
                );
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => respond_error(&client, reply, request.id, &e).await,
        }
    }
    Ok(())
}
