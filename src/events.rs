//! Backend event processing (history loads, live messages, send resolution).

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::buffer::SendOutcome;
use crate::protocol::UiEvent;
use crate::state::{ClientState, ConnectionStatus};

/// Process all pending events from the backend.
pub fn process_events(event_rx: &Receiver<UiEvent>, state: &mut ClientState) {
    // Drain all pending events from the backend
    while let Ok(event) = event_rx.try_recv() {
        apply_event(event, state);
    }
}

/// Apply one backend event.
///
/// Events for rooms that have been closed are dropped: the room (and its
/// optimistic entries) no longer exists, so there is nothing to update.
pub fn apply_event(event: UiEvent, state: &mut ClientState) {
    match event {
        UiEvent::Connected => {
            if matches!(state.connection, ConnectionStatus::Reconnecting(_)) {
                state.push_status("Reconnected");
            }
            state.connection = ConnectionStatus::Connected;
            info!("live transport connected");
        }

        UiEvent::Reconnecting { reason } => {
            if !matches!(state.connection, ConnectionStatus::Reconnecting(_)) {
                state.push_status("Reconnecting...");
            }
            state.connection = ConnectionStatus::Reconnecting(reason);
        }

        UiEvent::Disconnected(reason) => {
            debug!(%reason, "session disconnected");
            state.connection = ConnectionStatus::Disconnected;
            state.push_status("Disconnected");
        }

        UiEvent::Error(msg) => {
            warn!(error = %msg, "backend error");
            state.push_status(format!("Error: {}", msg));
        }

        UiEvent::HistoryLoaded { room_id, messages } => {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.set_history(messages);
            }
        }

        UiEvent::HistoryFailed { room_id, error } => {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.set_history_error(format!("Could not load messages: {}", error));
            }
        }

        UiEvent::MessageReceived { room_id, message } => {
            let is_active = state.active_room.as_deref() == Some(room_id.as_str());
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.push_received(message, is_active);
            }
        }

        UiEvent::SendConfirmed { room_id, temp_id } => {
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.confirm_sent(&temp_id);
            }
        }

        UiEvent::SendFailed {
            room_id,
            temp_id,
            error,
        } => {
            let Some(room) = state.rooms.get_mut(&room_id) else {
                return;
            };
            match room.resolve_failed(&temp_id) {
                SendOutcome::Delivered => {
                    debug!(%room_id, %temp_id, %error, "send reported failure but message was delivered");
                }
                SendOutcome::Failed => {
                    state.push_status(format!("Message not sent: {}", error));
                }
                SendOutcome::Unknown => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::message::{Message, MessageStatus};
    use crate::protocol::EngineAction;
    use chrono::{Duration, Utc};
    use crossbeam_channel::unbounded;

    fn live(id: &str, sender: &str, content: &str, offset_ms: i64) -> Message {
        Message {
            id: id.into(),
            sender_id: sender.into(),
            content: content.into(),
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            status: MessageStatus::Sent,
            room_id: Some("r1".into()),
        }
    }

    fn submitted(state: &mut ClientState, content: &str) -> String {
        match state.submit_to("r1", content.into(), None).unwrap() {
            EngineAction::Send { temp_id, .. } => temp_id,
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_history_and_live_messages() {
        let (tx, rx) = unbounded();
        let mut state = ClientState::new("me", EngineConfig::default());
        state.enter_room("r1").unwrap();
        state.enter_room("r2").unwrap();

        tx.send(UiEvent::HistoryLoaded {
            room_id: "r1".into(),
            messages: vec![live("h1", "bob", "old", -60_000)],
        })
        .unwrap();
        tx.send(UiEvent::MessageReceived {
            room_id: "r1".into(),
            message: live("m1", "bob", "new", 0),
        })
        .unwrap();
        process_events(&rx, &mut state);

        let room = state.room_mut("r1").unwrap();
        assert!(room.history_loaded);
        assert_eq!(room.messages().len(), 2);
        // r2 is active, so r1 counts the live message as unread
        assert_eq!(room.unread_count, 1);
    }

    #[test]
    fn test_send_failed_marks_failed_and_toasts() {
        let (tx, rx) = unbounded();
        let mut state = ClientState::new("me", EngineConfig::default());
        state.enter_room("r1").unwrap();
        let temp_id = submitted(&mut state, "hello");

        tx.send(UiEvent::SendFailed {
            room_id: "r1".into(),
            temp_id: temp_id.clone(),
            error: "timeout".into(),
        })
        .unwrap();
        process_events(&rx, &mut state);

        let room = state.room_mut("r1").unwrap();
        assert!(room.has_optimistic(&temp_id));
        assert_eq!(room.messages()[0].status, MessageStatus::Failed);
        assert!(state.status_messages.iter().any(|(m, _)| m.contains("not sent")));
    }

    #[test]
    fn test_send_failed_with_delivered_copy_removes_temp() {
        let (tx, rx) = unbounded();
        let mut state = ClientState::new("me", EngineConfig::default());
        state.enter_room("r1").unwrap();
        let temp_id = submitted(&mut state, "hello");

        tx.send(UiEvent::MessageReceived {
            room_id: "r1".into(),
            message: live("srv-1", "me", "hello", 40),
        })
        .unwrap();
        tx.send(UiEvent::SendFailed {
            room_id: "r1".into(),
            temp_id: temp_id.clone(),
            error: "ack lost".into(),
        })
        .unwrap();
        process_events(&rx, &mut state);

        let room = state.room_mut("r1").unwrap();
        assert!(!room.has_optimistic(&temp_id));
        let msgs = room.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "srv-1");
        assert!(state.status_messages.is_empty());
    }

    #[test]
    fn test_events_for_closed_room_are_ignored() {
        let (tx, rx) = unbounded();
        let mut state = ClientState::new("me", EngineConfig::default());
        state.enter_room("r1").unwrap();
        let temp_id = submitted(&mut state, "bye");
        state.leave_room("r1");

        tx.send(UiEvent::SendConfirmed {
            room_id: "r1".into(),
            temp_id,
        })
        .unwrap();
        tx.send(UiEvent::MessageReceived {
            room_id: "r1".into(),
            message: live("m1", "bob", "late", 0),
        })
        .unwrap();
        process_events(&rx, &mut state);
        assert!(state.room("r1").is_none());
    }

    #[test]
    fn test_connection_status_transitions() {
        let mut state = ClientState::new("me", EngineConfig::default());
        apply_event(UiEvent::Connected, &mut state);
        assert_eq!(state.connection, ConnectionStatus::Connected);
        apply_event(
            UiEvent::Reconnecting {
                reason: "reset".into(),
            },
            &mut state,
        );
        apply_event(
            UiEvent::Reconnecting {
                reason: "refused".into(),
            },
            &mut state,
        );
        assert_eq!(
            state.connection,
            ConnectionStatus::Reconnecting("refused".into())
        );
        apply_event(UiEvent::Connected, &mut state);
        let toasts: Vec<_> = state.status_messages.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(toasts, vec!["Reconnecting...", "Reconnected"]);
    }
}
