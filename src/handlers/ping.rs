//! Liveness handler.
//!
//! Answers `fleetplan.ping` with the worker identity, build version, and
//! uptime, so operators can tell which instance replied and how long it
//! has been up.

use std::time::Instant;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::types::ErrorResponse;

/// Pinned when the handler starts; uptime is measured from here.
static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Default, Serialize, Deserialize)]
struct PingRequest {
    /// Opaque token echoed back, for request/reply correlation checks.
    #[serde(default)]
    echo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    service: String,
    version: String,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    echo: Option<String>,
    timestamp: String,
}

impl PongResponse {
    fn now(echo: Option<String>) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: STARTED_AT.elapsed().as_secs(),
            echo,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Handle ping messages
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    // Start the uptime clock at subscription, not at the first ping.
    let _ = *STARTED_AT;

    while let Some(msg) = subscriber.next().await {
        debug!("Received ping message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                error!("Ping message without reply subject");
                continue;
            }
        };

        // Bare pings carry no payload at all; tolerate that.
        let request: PingRequest = if msg.payload.is_empty() {
            PingRequest::default()
        } else {
            match serde_json::from_slice(&msg.payload) {
                Ok(req) => req,
                Err(e) => {
                    error!("Failed to parse ping request: {}", e);
                    let error = ErrorResponse::new(Uuid::nil(), "BAD_INPUT", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
            }
        };

        let response = PongResponse::now(request.echo);
        client.publish(reply, serde_json::to_vec(&response)?.into()).await?;

        debug!("Sent pong response");
    }

    Ok(())
}
