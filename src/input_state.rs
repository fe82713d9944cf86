//! Composer state: the message being typed.

/// Manages the message composer.
#[derive(Default, Debug, Clone)]
pub struct InputState {
    /// Current message being composed
    pub message_input: String,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the composed text for submission and clear the input field.
    pub fn take_message(&mut self) -> String {
        std::mem::take(&mut self.message_input)
    }
}
