use crate::config::TelegramConfig;
use crate::platform::InboundEvent;

/// Decides which chat (and optionally which forum topic) gets archived.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    required_chat_id: String,
    required_thread_id: Option<String>,
}

impl ScopeFilter {
    pub fn new(required_chat_id: impl Into<String>, required_thread_id: Option<String>) -> Self {
        Self {
            required_chat_id: required_chat_id.into(),
            required_thread_id: required_thread_id.filter(|id| !id.is_empty()),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(
            config.channel_id.trim(),
            config
                .message_thread_id
                .as_deref()
                .map(|id| id.trim().to_string()),
        )
    }

    /// Whether the filter can let anything through at all
    pub fn is_configured(&self) -> bool {
        !self.required_chat_id.is_empty()
    }

    /// Fail-closed: with no chat configured nothing is in scope.
    pub fn should_process(&self, event: &InboundEvent) -> bool {
        if !self.is_configured() {
            return false;
        }

        let message = event.message();
        if message.chat_id.to_string() != self.required_chat_id {
            return false;
        }

        match &self.required_thread_id {
            Some(required) => message
                .thread_id
                .is_some_and(|thread_id| thread_id.to_string() == *required),
            None => true,
        }
    }
}
