//! Conversation context
//!
//! Short-term memory across turns: completed exchanges are kept so
//! follow-up questions resolve, and the whole history expires after a
//! period of inactivity so a stale conversation never bleeds into a new
//! one. The history is append-only between resets: it is cleared
//! wholesale by expiry or `reset`, never partially pruned, so the
//! inactivity timeout is also what bounds its growth.

use std::time::{Duration, Instant};

use crate::llm::ChatMessage;

/// Transcript of the current conversation with inactivity expiry
pub struct ConversationContext {
    timeout: Duration,
    last_activity: Instant,
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    /// Create an empty context that expires after `timeout_secs` idle
    #[must_use]
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            last_activity: Instant::now(),
            messages: Vec::new(),
        }
    }

    /// Prior exchanges, oldest first; expires stale history first
    pub fn messages(&mut self) -> &[ChatMessage] {
        self.expire_if_idle(Instant::now());
        &self.messages
    }

    /// Record one completed exchange
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.expire_if_idle(Instant::now());
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(assistant));
        self.last_activity = Instant::now();
    }

    /// Drop all history
    pub fn reset(&mut self) {
        self.messages.clear();
        self.last_activity = Instant::now();
    }

    /// Number of stored messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no exchanges are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn expire_if_idle(&mut self, now: Instant) {
        if !self.messages.is_empty() && now.duration_since(self.last_activity) >= self.timeout {
            tracing::debug!(
                messages = self.messages.len(),
                "conversation expired after inactivity"
            );
            self.messages.clear();
        }
    }

    #[cfg(test)]
    fn backdate(&mut self, by: Duration) {
        self.last_activity -= by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_accumulate_in_order() {
        let mut context = ConversationContext::new(300);
        context.record_exchange("what time is it", "It is noon.");
        context.record_exchange("and tomorrow", "Also noon.");

        let messages = context.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content.as_deref(), Some("what time is it"));
        assert_eq!(messages[3].role, "assistant");
        assert_eq!(messages[3].content.as_deref(), Some("Also noon."));
    }

    #[test]
    fn history_expires_after_inactivity() {
        let mut context = ConversationContext::new(300);
        context.record_exchange("hello", "Hi.");
        context.backdate(Duration::from_secs(301));

        assert!(context.messages().is_empty());
    }

    #[test]
    fn history_survives_within_timeout() {
        let mut context = ConversationContext::new(300);
        context.record_exchange("hello", "Hi.");
        context.backdate(Duration::from_secs(299));

        assert_eq!(context.messages().len(), 2);
    }

    #[test]
    fn history_is_never_partially_pruned() {
        let mut context = ConversationContext::new(300);
        for i in 0..40 {
            context.record_exchange(&format!("question {i}"), &format!("answer {i}"));
        }

        // Long conversations keep every exchange until a reset or expiry
        let messages = context.messages();
        assert_eq!(messages.len(), 80);
        assert_eq!(messages[0].content.as_deref(), Some("question 0"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut context = ConversationContext::new(300);
        context.record_exchange("hello", "Hi.");
        context.reset();
        assert!(context.is_empty());
    }
}
