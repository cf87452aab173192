//! Live job progress over WebSocket.
//!
//! A client connects with `?job_id=`, receives the job's current state and
//! then every event for that job until it reaches a terminal state.

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::jobs::JobEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct ProgressParams {
    pub job_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/progress", get(progress_ws))
}

async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ProgressParams>,
) -> ApiResult<impl IntoResponse> {
    // Unknown jobs are rejected before the upgrade.
    state.jobs.get(&params.job_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params.job_id)))
}

fn encode(event: &JobEvent) -> Option<Message> {
    serde_json::to_string(event)
        .ok()
        .map(|text| Message::Text(text.into()))
}

async fn handle_socket(socket: WebSocket, state: AppState, job_id: String) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before reading the snapshot so no transition falls in between.
    let mut events = state.jobs.context().events.subscribe();

    let Ok(job) = state.jobs.get(&job_id) else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };
    let snapshot = JobEvent::snapshot(&job);
    if let Some(msg) = encode(&snapshot)
        && sender.send(msg).await.is_err()
    {
        return;
    }
    if snapshot.is_terminal() {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = events.recv() => {
                match result {
                    Ok(event) if event.job_id() == job_id => {
                        let terminal = event.is_terminal();
                        let Some(msg) = encode(&event) else { continue };
                        if sender.send(msg).await.is_err() {
                            break;
                        }
                        if terminal {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        // Resynchronise with the current state.
                        debug!(job_id = %job_id, skipped, "Progress subscriber lagged");
                        let Ok(job) = state.jobs.get(&job_id) else { break };
                        let snapshot = JobEvent::snapshot(&job);
                        let Some(msg) = encode(&snapshot) else { continue };
                        if sender.send(msg).await.is_err() || snapshot.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
