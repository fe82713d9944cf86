//! Core client state, separated from any UI toolkit.
//!
//! `ClientState` holds every room timeline, the connection status and the
//! composer. Backend results only reach it through `events::process_events`;
//! user intent goes through the methods here, which return the
//! `EngineAction` the caller should forward to the backend.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::buffer::RoomTimeline;
use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::input_state::InputState;
use crate::message::{temp_id, Message};
use crate::protocol::{EngineAction, SendRequest};
use crate::validation::{sanitize_message, validate_message, validate_room_id};

/// Live transport status as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    /// Connection lost; the backend is retrying
    Reconnecting(String),
}

/// Core application state for the chat client.
pub struct ClientState {
    /// Id of the signed-in user; used as sender of optimistic messages.
    pub own_user_id: String,

    pub connection: ConnectionStatus,

    /// Room timelines keyed by room id.
    pub rooms: HashMap<String, RoomTimeline>,

    /// Ordered list of room ids (for sidebar display).
    pub rooms_order: Vec<String>,

    /// Currently visible room.
    pub active_room: Option<String>,

    /// Status toast messages with creation time (auto-expire).
    pub status_messages: Vec<(String, Instant)>,

    /// Composer.
    pub input: InputState,

    pub config: EngineConfig,
}

impl ClientState {
    pub fn new(own_user_id: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            own_user_id: own_user_id.into(),
            connection: ConnectionStatus::Disconnected,
            rooms: HashMap::new(),
            rooms_order: Vec::new(),
            active_room: None,
            status_messages: Vec::new(),
            input: InputState::new(),
            config,
        }
    }

    /// Open a room: create its timeline, make it active and return the
    /// action that subscribes to it and loads its history.
    pub fn enter_room(&mut self, room_id: &str) -> Result<EngineAction, ValidationError> {
        validate_room_id(room_id)?;
        if !self.rooms.contains_key(room_id) {
            let timeline = RoomTimeline::with_options(
                room_id,
                self.config.dedup_window,
                self.config.retention,
            );
            self.rooms.insert(room_id.to_string(), timeline);
            self.rooms_order.push(room_id.to_string());
        }
        self.switch_to_room(room_id);
        Ok(EngineAction::EnterRoom {
            room_id: room_id.to_string(),
        })
    }

    /// Close a room. Its optimistic messages are discarded with it and any
    /// late backend event for it is ignored.
    pub fn leave_room(&mut self, room_id: &str) -> Option<EngineAction> {
        self.rooms.remove(room_id)?;
        self.rooms_order.retain(|r| r != room_id);
        if self.active_room.as_deref() == Some(room_id) {
            self.active_room = self.rooms_order.first().cloned();
        }
        debug!(%room_id, "room closed");
        Some(EngineAction::LeaveRoom {
            room_id: room_id.to_string(),
        })
    }

    /// Switch to a specific room by id.
    pub fn switch_to_room(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.clear_unread();
            self.active_room = Some(room_id.to_string());
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomTimeline> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut RoomTimeline> {
        self.rooms.get_mut(room_id)
    }

    /// Submit the composer text to the active room.
    pub fn submit(&mut self, receiver_id: Option<String>) -> Result<EngineAction, ValidationError> {
        let room_id = self
            .active_room
            .clone()
            .ok_or(ValidationError::NoActiveRoom)?;
        let text = sanitize_message(&self.input.message_input);
        validate_message(&text)?;
        self.input.take_message();
        self.submit_to(&room_id, text, receiver_id)
    }

    /// Add an optimistic message to `room_id` and build its send action.
    pub fn submit_to(
        &mut self,
        room_id: &str,
        content: String,
        receiver_id: Option<String>,
    ) -> Result<EngineAction, ValidationError> {
        validate_message(&content)?;
        let own_user_id = self.own_user_id.clone();
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ValidationError::UnknownRoom(room_id.to_string()))?;

        let now = Utc::now();
        let id = temp_id(now, |candidate| room.has_optimistic(candidate));
        room.add_optimistic(Message::optimistic(
            id.clone(),
            own_user_id,
            content.clone(),
            room_id,
            now,
        ));

        Ok(EngineAction::Send {
            room_id: room_id.to_string(),
            temp_id: id,
            request: SendRequest {
                content,
                room_id: room_id.to_string(),
                receiver_id,
            },
        })
    }

    /// Resubmit a message whose send failed, under a fresh temporary id.
    pub fn resend_failed(
        &mut self,
        room_id: &str,
        temp_id: &str,
        receiver_id: Option<String>,
    ) -> Result<EngineAction, ValidationError> {
        let failed = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ValidationError::UnknownRoom(room_id.to_string()))?
            .take_failed(temp_id)
            .ok_or_else(|| ValidationError::NotFailed(temp_id.to_string()))?;
        self.submit_to(room_id, failed.content, receiver_id)
    }

    pub fn push_status(&mut self, text: impl Into<String>) {
        self.status_messages.push((text.into(), Instant::now()));
    }

    /// Purge status messages older than `config.status_max_age`.
    pub fn purge_old_status_messages(&mut self) {
        let max_age = self.config.status_max_age;
        self.status_messages
            .retain(|(_, created)| created.elapsed() < max_age);
    }
}
