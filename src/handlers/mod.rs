//! NATS message handlers

pub mod edits;
pub mod ping;
pub mod plan;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PlanError;
use crate::services::delta::EditDeltaEngine;
use crate::services::directions::{
    DirectionsProvider, MockDirectionsProvider, TmapClient, TmapConfig,
};
use crate::services::materializer::Materializer;
use crate::services::plans::PlanService;
use crate::store::PlanStore;
use crate::types::ErrorResponse;

/// Shared handler state.
pub struct AppState {
    pub store: Arc<PlanStore>,
    pub plans: PlanService,
    pub delta: EditDeltaEngine,
}

/// Pick the directions provider: T-map when an app key is configured,
/// the haversine mock otherwise (local development without credentials).
fn create_directions_provider(config: &Config) -> Arc<dyn DirectionsProvider> {
    if config.tmap_app_key.is_empty() {
        warn!("TMAP_APP_KEY not set, using mock directions provider");
        Arc::new(MockDirectionsProvider::new())
    } else {
        let mut tmap = TmapConfig::new(&config.tmap_base_url, &config.tmap_app_key);
        tmap.timeout_seconds = config.provider_timeout_secs;
        Arc::new(TmapClient::new(tmap))
    }
}

/// Serialize a typed error into the reply envelope.
pub(crate) async fn respond_error(client: &Client, reply: Subject, id: Uuid, err: &PlanError) {
    let error = ErrorResponse::new(id, err.code(), err.to_string());
    if let Ok(bytes) = serde_json::to_vec(&error) {
        let _ = client.publish(reply, bytes.into()).await;
    }
}

/// Start all message handlers
pub async fn start_handlers(client: Client, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let store = Arc::new(PlanStore::new(config.data_dir.clone()));

    let provider = create_directions_provider(config);
    info!("Directions provider initialized: {}", provider.name());

    let materializer = Arc::new(Materializer::new(
        provider,
        config.max_inflight_routes,
        Duration::from_secs(config.vehicle_timeout_secs),
    ));

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        plans: PlanService::new(Arc::clone(&store), Arc::clone(&materializer)),
        delta: EditDeltaEngine::new(Arc::clone(&store), Arc::clone(&materializer)),
    });

    // Subscribe to all subjects
    let ping_sub = client.subscribe("fleetplan.ping").await?;
    let optimize_sub = client.subscribe("fleetplan.plan.optimize").await?;
    let materialize_sub = client.subscribe("fleetplan.plan.materialize").await?;
    let stops_changed_sub = client.subscribe("fleetplan.stops.changed").await?;
    let edits_list_sub = client.subscribe("fleetplan.edits.list").await?;
    let edits_create_sub = client.subscribe("fleetplan.edits.create").await?;
    let edits_delete_sub = client.subscribe("fleetplan.edits.delete").await?;
    let edit_reload_sub = client.subscribe("fleetplan.edit.reload").await?;
    let edit_stop_move_sub = client.subscribe("fleetplan.edit.stop.move").await?;
    let edit_reorder_sub = client.subscribe("fleetplan.edit.reorder").await?;

    info!("Subscribed to NATS subjects");

    let handles = vec![
        tokio::spawn(ping::handle_ping(client.clone(), ping_sub)),
        tokio::spawn(plan::handle_optimize(client.clone(), optimize_sub, Arc::clone(&state))),
        tokio::spawn(plan::handle_materialize(
            client.clone(),
            materialize_sub,
            Arc::clone(&state),
        )),
        tokio::spawn(plan::handle_stops_changed(
            client.clone(),
            stops_changed_sub,
            Arc::clone(&state),
        )),
        tokio::spawn(edits::handle_list(client.clone(), edits_list_sub, Arc::clone(&state))),
        tokio::spawn(edits::handle_create(client.clone(), edits_create_sub, Arc::clone(&state))),
        tokio::spawn(edits::handle_delete(client.clone(), edits_delete_sub, Arc::clone(&state))),
        tokio::spawn(edits::handle_reload(client.clone(), edit_reload_sub, Arc::clone(&state))),
        tokio::spawn(edits::handle_stop_move(
            client.clone(),
            edit_stop_move_sub,
            Arc::clone(&state),
        )),
        tokio::spawn(edits::handle_reorder(client.clone(), edit_reorder_sub, state)),
    ];

    info!("All handlers running");

    for handle in handles {
        handle.await??;
    }

    Ok(())
}
