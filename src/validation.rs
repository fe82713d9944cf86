//! Input validation before a message enters the send path

use crate::error::ValidationError;

/// Longest message body accepted from the composer
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Longest accepted room id
const MAX_ROOM_ID_LEN: usize = 128;

/// Validates a room identifier
pub fn validate_room_id(room_id: &str) -> Result<(), ValidationError> {
    if room_id.is_empty() {
        return Err(ValidationError::EmptyRoomId);
    }
    if room_id.len() > MAX_ROOM_ID_LEN
        || room_id.contains(|c: char| c.is_control() || c.is_whitespace())
    {
        return Err(ValidationError::InvalidRoomId);
    }
    Ok(())
}

/// Validates a message body (after sanitizing)
pub fn validate_message(msg: &str) -> Result<(), ValidationError> {
    if msg.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if msg.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(())
}

/// Strips NULs and surrounding whitespace; newlines inside are kept
pub fn sanitize_message(msg: &str) -> String {
    msg.trim().chars().filter(|&c| c != '\0').collect()
}
