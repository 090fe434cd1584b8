//! Assertion helpers for sync scenarios.
//!
//! These are pure functions that verify engine state after a scenario
//! completes. They take state as input and return pass/fail.

use std::collections::HashSet;

use chat_types::{Conversation, Message, MessageId};

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }

    /// Panic with the failure details if the check failed.
    pub fn assert(self) {
        if let Some(details) = self.failure_details.filter(|_| !self.passed) {
            panic!("{}: {}", self.description, details);
        }
    }
}

/// Inbox order: latest message first, conversations without messages last.
pub fn check_inbox_order(conversations: &[Conversation]) -> AssertionResult {
    const DESC: &str = "inbox sorted by last message time";
    for pair in conversations.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        match (a.last_message_time, b.last_message_time) {
            (None, Some(_)) => {
                return AssertionResult::fail(
                    DESC,
                    format!("{} has no messages but sorts before {}", a.id, b.id),
                )
            }
            (Some(ta), Some(tb)) if ta < tb => {
                return AssertionResult::fail(
                    DESC,
                    format!("{} ({}) sorts before newer {} ({})", a.id, ta, b.id, tb),
                )
            }
            _ => {}
        }
    }
    AssertionResult::pass(DESC)
}

/// Thread order: ascending server time, no duplicates.
pub fn check_thread_order(messages: &[Message]) -> AssertionResult {
    const DESC: &str = "thread sorted by server time without duplicates";
    let mut ids = HashSet::new();
    for message in messages {
        if !ids.insert(message.id) {
            return AssertionResult::fail(DESC, format!("{} appears twice", message.id));
        }
    }
    for pair in messages.windows(2) {
        if pair[0].order_key() > pair[1].order_key() {
            return AssertionResult::fail(
                DESC,
                format!("{} sorts after {}", pair[0].id, pair[1].id),
            );
        }
    }
    AssertionResult::pass(DESC)
}

/// Every id in `expected` was sent in exactly one `mark_read` request.
pub fn check_single_read_batch(
    requests: &[Vec<MessageId>],
    expected: &[MessageId],
) -> AssertionResult {
    const DESC: &str = "visible messages committed in one mark_read";
    match requests {
        [only] => {
            let got: HashSet<_> = only.iter().collect();
            let want: HashSet<_> = expected.iter().collect();
            if got == want {
                AssertionResult::pass(DESC)
            } else {
                AssertionResult::fail(DESC, format!("batch {:?}, expected {:?}", only, expected))
            }
        }
        _ => AssertionResult::fail(DESC, format!("{} requests: {:?}", requests.len(), requests)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::{ConversationId, MessageType, UserId};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Conversation whose last message is `seconds` after epoch (0 = none).
    fn at(seconds: i64) -> Conversation {
        let mut c =
            Conversation::new(ConversationId::new(), UserId::new(), UserId::new(), epoch()).unwrap();
        if seconds > 0 {
            c.last_message_time = Some(epoch() + Duration::seconds(seconds));
        }
        c
    }

    fn message(conversation: ConversationId, id: MessageId) -> Message {
        Message {
            id,
            conversation_id: conversation,
            order_id: None,
            sender_id: UserId::new(),
            content: "hi".into(),
            attachment: None,
            read: false,
            created_at: epoch(),
            message_type: MessageType::Text,
        }
    }

    #[test]
    fn inbox_order_detects_empty_before_active() {
        assert!(check_inbox_order(&[at(20), at(10), at(0)]).passed);
        assert!(!check_inbox_order(&[at(0), at(10)]).passed);
        assert!(!check_inbox_order(&[at(10), at(20)]).passed);
    }

    #[test]
    fn thread_order_detects_duplicates() {
        let conversation = ConversationId::new();
        let id = MessageId::new();
        let twice = [message(conversation, id), message(conversation, id)];
        assert!(!check_thread_order(&twice).passed);
    }

    #[test]
    fn read_batch_requires_single_request() {
        let ids = [MessageId::new(), MessageId::new()];
        assert!(check_single_read_batch(&[ids.to_vec()], &ids).passed);
        assert!(!check_single_read_batch(&[vec![ids[0]], vec![ids[1]]], &ids).passed);
        assert!(!check_single_read_batch(&[], &ids).passed);
    }
}
