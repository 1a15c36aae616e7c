//! Read-only health surface for external probes.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::DateTime;
use engine::{IngestStats, StatsSnapshot, enums::SessionState};
use serde::Serialize;

/// Mounts `GET /health` over the shared stats.
pub fn router(stats: Arc<IngestStats>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(stats)
}

async fn health_handler(State(stats): State<Arc<IngestStats>>) -> Json<HealthResponse> {
    Json(HealthResponse::from_snapshot(&stats.snapshot()))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub session_state: String,
    pub connection: ConnectionHealth,
    pub subscription: SubscriptionHealth,
    pub writer: WriterHealth,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealth {
    pub is_running: bool,
    pub attempts: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionHealth {
    pub is_subscribed: bool,
    pub total_events_received: u64,
    pub events_rejected: u64,
    pub event_rate_per_minute: u64,
}

#[derive(Debug, Serialize)]
pub struct WriterHealth {
    pub batches: u64,
    pub records: u64,
    pub records_dropped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastErrorHealth>,
}

#[derive(Debug, Serialize)]
pub struct LastErrorHealth {
    pub kind: String,
    pub at: String,
}

impl HealthResponse {
    #[must_use]
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        let healthy = snapshot.session_state == SessionState::Active && !snapshot.writer_fatal;

        Self {
            status: if healthy { "healthy" } else { "unhealthy" },
            uptime_seconds: snapshot.uptime.as_secs(),
            session_state: snapshot.session_state.to_string(),
            connection: ConnectionHealth {
                is_running: snapshot.session_state == SessionState::Active,
                attempts: snapshot.connection_attempts,
                successful: snapshot.successful_connections,
                failed: snapshot.failed_connections,
            },
            subscription: SubscriptionHealth {
                is_subscribed: snapshot.is_subscribed,
                total_events_received: snapshot.events_received,
                events_rejected: snapshot.events_rejected,
                event_rate_per_minute: snapshot.event_rate_per_minute,
            },
            writer: WriterHealth {
                batches: snapshot.batches_written,
                records: snapshot.records_written,
                records_dropped: snapshot.records_dropped,
                last_write: snapshot.last_write_unix_ms.and_then(rfc3339_from_millis),
                last_error: snapshot.last_error.as_ref().map(|e| LastErrorHealth {
                    kind: e.kind.clone(),
                    at: rfc3339_from_millis(e.at_unix_ms).unwrap_or_default(),
                }),
            },
        }
    }
}

fn rfc3339_from_millis(millis: u64) -> Option<String> {
    DateTime::from_timestamp_millis(millis as i64).map(|t| t.to_rfc3339())
}
