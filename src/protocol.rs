use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Payload of the external "send message" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub content: String,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

/// Actions sent from the UI to the Backend
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Subscribe to a room and load its history
    EnterRoom { room_id: String },
    /// Unsubscribe and cancel the room's in-flight sends
    LeaveRoom { room_id: String },
    /// Dispatch an optimistic message already added to the room timeline
    Send {
        room_id: String,
        temp_id: String,
        request: SendRequest,
    },
    /// Tear the session down
    Shutdown,
}

/// Events sent from the Backend to the UI
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Live transport connected (or reconnected)
    Connected,
    /// Live transport lost; retrying
    Reconnecting { reason: String },
    /// Session ended
    Disconnected(String),
    /// Non-fatal backend error
    Error(String),
    /// History load finished
    HistoryLoaded {
        room_id: String,
        messages: Vec<Message>,
    },
    /// History load failed
    HistoryFailed { room_id: String, error: String },
    /// A live message arrived for a room
    MessageReceived { room_id: String, message: Message },
    /// Send acknowledged and the cleanup delay elapsed
    SendConfirmed { room_id: String, temp_id: String },
    /// Send failed and the re-check delay elapsed
    SendFailed {
        room_id: String,
        temp_id: String,
        error: String,
    },
}
