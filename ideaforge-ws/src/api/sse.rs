//! Server-Sent Events stream for session subscribers
//!
//! A subscriber receives a `snapshot` event first, then a replay of
//! persisted events newer than `?since=`, then the live stream.
//! Delivery is at-least-once: sequence numbers let the client
//! deduplicate, and a reconnect with `since=<last seq>` converges to
//! current state without re-reading the whole log.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    /// Replay persisted events with seq greater than this (default 0)
    pub since: Option<u64>,
}

/// GET /api/session/:id/events
pub async fn event_stream(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the snapshot so nothing published in
    // between can be missed; duplicates are filtered by seq below.
    let mut rx = state.coordinator.bus().subscribe();
    let snapshot = state.coordinator.snapshot(session_id).await?;
    let since = query.since.unwrap_or(0);
    let backlog = state.coordinator.events_since(session_id, since).await?;

    info!(%session_id, since, backlog = backlog.len(), "SSE subscriber connected");

    let stream = async_stream::stream! {
        let mut delivered = since;

        match serde_json::to_string(&snapshot) {
            Ok(json) => yield Ok(Event::default().event("snapshot").data(json)),
            Err(e) => warn!("SSE: failed to serialize snapshot: {}", e),
        }

        for envelope in backlog {
            if envelope.seq <= delivered {
                continue;
            }
            delivered = envelope.seq;
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    yield Ok(Event::default().event(envelope.event.event_type()).data(json));
                }
                Err(e) => warn!("SSE: failed to serialize event: {}", e),
            }
        }

        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(envelope) => {
                            if envelope.session_id != session_id || envelope.seq <= delivered {
                                continue;
                            }
                            delivered = envelope.seq;
                            match serde_json::to_string(&envelope) {
                                Ok(json) => {
                                    yield Ok(Event::default()
                                        .event(envelope.event.event_type())
                                        .data(json));
                                }
                                Err(e) => warn!("SSE: failed to serialize event: {}", e),
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Client catches up via since-replay on reconnect
                            warn!(skipped, "SSE subscriber lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
