//! Plan lifecycle message handlers: optimize, baseline materialization,
//! stop-set change notifications.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{respond_error, AppState};
use crate::services::plans::resolve_params;
use crate::types::{
    AckResponse, ErrorResponse, MaterializeRequest, MaterializeResponse, OptimizeRequest,
    ProjectRequest, Request, SuccessResponse,
};

/// Handle plan.optimize messages
pub async fn handle_optimize(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received plan.optimize message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<OptimizeRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse optimize request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "BAD_INPUT", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        match state.plans.optimize(&request.payload, request.id).await {
            Ok(response) => {
                info!(
                    project = request.payload.project_id.as_str(),
                    vehicles = response.plan.vehicles.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "optimize succeeded"
                );
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                info!(
                    project = request.payload.project_id.as_str(),
                    code = e.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "optimize failed"
                );
                respond_error(&client, reply, request.id, &e).await;
            }
        }
    }

    Ok(())
}

/// Handle plan.materialize messages
pub async fn handle_materialize(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received plan.materialize message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<MaterializeRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse materialize request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "BAD_INPUT", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let params = match resolve_params(&request.payload.params) {
            Ok(params) => params,
            Err(e) => {
                respond_error(&client, reply, request.id, &e).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let project_id = request.payload.project_id.clone();
        match state.plans.materialize_baseline(&project_id, params).await {
            Ok((artifact, failed)) if failed.is_empty() => {
                info!(
                    project = project_id.as_str(),
                    vehicles = artifact.vehicles.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "baseline materialized"
                );
                let success =
                    SuccessResponse::new(request.id, MaterializeResponse { artifact });
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Ok((artifact, failed)) => {
                info!(
                    project = project_id.as_str(),
                    vehicles = artifact.vehicles.len(),
                    failed = failed.len(),
                    "baseline materialized partially"
                );
                // Every vehicle failing means the provider itself is down;
                // a subset failing is a partial outcome. The artifact was
                // written either way.
                let err = if failed.len() == artifact.vehicles.len() {
                    crate::error::PlanError::ProviderUnavailable(format!(
                        "all {} vehicles failed; artifact written",
                        failed.len()
                    ))
                } else {
                    crate::error::PlanError::PartialMaterialization { failed_vehicle_ids: failed }
                };
                respond_error(&client, reply, request.id, &err).await;
            }
            Err(e) => {
                respond_error(&client, reply, request.id, &e).await;
            }
        }
    }

    Ok(())
}

/// Handle stops.changed notifications: a stop-set mutation invalidates
/// every cached materialization of the project.
pub async fn handle_stops_changed(
    client: Client,
    mut subscriber: Subscriber,
    state: Arc<AppState>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received stops.changed message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<ProjectRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse stops.changed request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "BAD_INPUT", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match state.store.invalidate_materializations(&request.payload.project_id) {
            Ok(cleared) => {
                let success = SuccessResponse::new(
                    request.id,
                    AckResponse { message: format!("{cleared} materializations invalidated") },
                );
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                respond_error(&client, reply, request.id, &e).await;
            }
        }
    }

    Ok(())
}
