//! Handlers for engine actions, live events and the per-message send task.

use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::services::{HistorySource, LiveEvent, LiveTransport, MessageSender};
use crate::config::EngineConfig;
use crate::error::SendError;
use crate::message::{normalize, raw_room_id, Message};
use crate::protocol::{EngineAction, SendRequest, UiEvent};

/// Whether the main loop keeps running after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Backend-side session bookkeeping.
pub struct Session {
    /// Entered rooms, each with the token that scopes its in-flight tasks
    pub rooms: HashMap<String, CancellationToken>,
    pub root: CancellationToken,
    pub connected: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            root: CancellationToken::new(),
            connected: false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle an action from the UI
pub async fn handle_engine_action(
    action: EngineAction,
    session: &mut Session,
    live: &mut dyn LiveTransport,
    history: &Arc<dyn HistorySource>,
    sender: &Arc<dyn MessageSender>,
    config: &EngineConfig,
    event_tx: &Sender<UiEvent>,
) -> Flow {
    match action {
        EngineAction::EnterRoom { room_id } => {
            let token = match session.rooms.get(&room_id) {
                Some(token) => token.clone(),
                None => {
                    let token = session.root.child_token();
                    session.rooms.insert(room_id.clone(), token.clone());
                    token
                }
            };
            if session.connected {
                if let Err(e) = live.subscribe(&room_id).await {
                    warn!(%room_id, error = %e, "subscribe failed");
                    let _ = event_tx.send(UiEvent::Error(format!(
                        "Failed to subscribe to {}: {}",
                        room_id, e
                    )));
                }
            }
            debug!(%room_id, "entered room");
            tokio::spawn(load_history(
                room_id,
                history.clone(),
                token,
                event_tx.clone(),
            ));
        }

        EngineAction::LeaveRoom { room_id } => {
            if let Some(token) = session.rooms.remove(&room_id) {
                token.cancel();
                if session.connected {
                    if let Err(e) = live.unsubscribe(&room_id).await {
                        warn!(%room_id, error = %e, "unsubscribe failed");
                    }
                }
                debug!(%room_id, "left room");
            }
        }

        EngineAction::Send {
            room_id,
            temp_id,
            request,
        } => match session.rooms.get(&room_id) {
            Some(token) => {
                tokio::spawn(run_send(
                    room_id,
                    temp_id,
                    request,
                    sender.clone(),
                    token.clone(),
                    *config,
                    event_tx.clone(),
                ));
            }
            None => {
                warn!(%room_id, %temp_id, "send for a room that was not entered");
                let _ = event_tx.send(UiEvent::SendFailed {
                    room_id,
                    temp_id,
                    error: "room not entered".into(),
                });
            }
        },

        EngineAction::Shutdown => {
            session.root.cancel();
            session.rooms.clear();
            live.close().await;
            session.connected = false;
            let _ = event_tx.send(UiEvent::Disconnected("Session closed".into()));
            return Flow::Stop;
        }
    }
    Flow::Continue
}

/// Route one live event to its room.
pub fn handle_live_event(event: LiveEvent, session: &Session, event_tx: &Sender<UiEvent>) {
    let Some(room_id) = event.room_id.clone().or_else(|| raw_room_id(&event.payload)) else {
        warn!("live event without room, dropped");
        return;
    };
    if !session.rooms.contains_key(&room_id) {
        debug!(%room_id, "live event for a room not entered, dropped");
        return;
    }
    match normalize(&event.payload) {
        Ok(mut message) => {
            message.room_id.get_or_insert_with(|| room_id.clone());
            let _ = event_tx.send(UiEvent::MessageReceived { room_id, message });
        }
        Err(e) => warn!(%room_id, error = %e, "malformed live event dropped"),
    }
}

/// (Re)connect the live transport and resubscribe every entered room.
pub async fn connect_live(
    live: &mut dyn LiveTransport,
    session: &mut Session,
    event_tx: &Sender<UiEvent>,
) -> bool {
    match live.connect().await {
        Ok(()) => {
            session.connected = true;
            for room_id in session.rooms.keys() {
                if let Err(e) = live.subscribe(room_id).await {
                    warn!(%room_id, error = %e, "resubscribe failed");
                }
            }
            debug!(rooms = session.rooms.len(), "live transport connected");
            let _ = event_tx.send(UiEvent::Connected);
            true
        }
        Err(e) => {
            session.connected = false;
            warn!(error = %e, "live transport connect failed");
            let _ = event_tx.send(UiEvent::Reconnecting {
                reason: e.to_string(),
            });
            false
        }
    }
}

/// One-shot history load for a room.
pub async fn load_history(
    room_id: String,
    history: Arc<dyn HistorySource>,
    token: CancellationToken,
    event_tx: Sender<UiEvent>,
) {
    let result = tokio::select! {
        _ = token.cancelled() => return,
        r = history.fetch(&room_id) => r,
    };
    if token.is_cancelled() {
        return;
    }
    let event = match result {
        Ok(raw) => {
            let messages: Vec<Message> = raw
                .iter()
                .filter_map(|r| match normalize(r) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!(%room_id, error = %e, "malformed history record skipped");
                        None
                    }
                })
                .collect();
            UiEvent::HistoryLoaded { room_id, messages }
        }
        Err(e) => {
            warn!(%room_id, error = %e, "history load failed");
            UiEvent::HistoryFailed {
                room_id,
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event);
}

/// Send one optimistic message and report its resolution after the
/// configured delay.
///
/// Success waits `success_cleanup_delay` so the live copy can land first;
/// failure waits `failure_recheck_delay` before the UI re-checks for a
/// delivered copy. Nothing is reported once the room token is cancelled.
pub async fn run_send(
    room_id: String,
    temp_id: String,
    request: SendRequest,
    sender: Arc<dyn MessageSender>,
    token: CancellationToken,
    config: EngineConfig,
    event_tx: Sender<UiEvent>,
) {
    let timeout_ms = config.send_timeout.as_millis() as u64;
    let result = tokio::select! {
        _ = token.cancelled() => Err(SendError::Cancelled),
        r = timeout(config.send_timeout, sender.send(&request)) => {
            r.unwrap_or(Err(SendError::Timeout(timeout_ms)))
        }
    };

    let (delay, event) = match result {
        Ok(()) => {
            debug!(%room_id, %temp_id, "send acknowledged");
            (
                config.success_cleanup_delay,
                UiEvent::SendConfirmed {
                    room_id,
                    temp_id,
                },
            )
        }
        Err(SendError::Cancelled) => {
            debug!(%room_id, %temp_id, "send cancelled");
            return;
        }
        Err(e) => {
            warn!(%room_id, %temp_id, error = %e, "send failed");
            (
                config.failure_recheck_delay,
                UiEvent::SendFailed {
                    room_id,
                    temp_id,
                    error: e.to_string(),
                },
            )
        }
    };

    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(delay) => {}
    }
    if !token.is_cancelled() {
        let _ = event_tx.send(event);
    }
}
