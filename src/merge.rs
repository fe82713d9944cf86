//! Merge of history, live and optimistic messages into one view.
//!
//! Dedup is keyed on `(content, sender_id, created_at within window)`, not on
//! message id: servers do not echo the client's temporary id back. Two
//! genuinely distinct messages with the same text from the same sender inside
//! the window collapse into one. That is a known limitation of the heuristic;
//! the window is configurable through `Settings::dedup_window_ms`.

use chrono::Duration;

use crate::message::Message;

/// Default dedup window.
pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 5000;

/// Whether two messages count as the same logical message.
///
/// The time difference must be strictly below `window`.
pub fn same_logical_message(a: &Message, b: &Message, window: Duration) -> bool {
    a.content == b.content
        && a.sender_id == b.sender_id
        && (a.created_at - b.created_at).abs() < window
}

/// First message in `sources` matching `candidate`.
pub fn find_match<'a, I>(candidate: &Message, sources: I, window: Duration) -> Option<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    sources
        .into_iter()
        .find(|m| same_logical_message(candidate, m, window))
}

/// Merge the three sources.
///
/// Sources are concatenated fetched, received, optimistic; the first entry of
/// each logical message wins, so an authoritative copy hides its optimistic
/// twin. The result is stably sorted ascending by `created_at`.
pub fn merge<'a, F, R, O>(fetched: F, received: R, optimistic: O, window: Duration) -> Vec<Message>
where
    F: IntoIterator<Item = &'a Message>,
    R: IntoIterator<Item = &'a Message>,
    O: IntoIterator<Item = &'a Message>,
{
    let mut merged: Vec<Message> = Vec::new();
    for msg in fetched.into_iter().chain(received).chain(optimistic) {
        if find_match(msg, merged.iter(), window).is_none() {
            merged.push(msg.clone());
        }
    }
    merged.sort_by_key(|m| m.created_at);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageStatus;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn msg(id: &str, sender: &str, content: &str, ms: i64) -> Message {
        Message {
            id: id.into(),
            sender_id: sender.into(),
            content: content.into(),
            created_at: at(ms),
            status: MessageStatus::Sent,
            room_id: None,
        }
    }

    const NONE: &[Message] = &[];

    fn window() -> Duration {
        Duration::milliseconds(DEFAULT_DEDUP_WINDOW_MS)
    }

    #[test]
    fn test_dedup_within_window() {
        let fetched = vec![msg("1", "1", "hi", 0)];
        let received = vec![msg("2", "1", "hi", 2000)];
        let out = merge(&fetched, &received, NONE, window());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "1");
    }

    #[test]
    fn test_dedup_boundary() {
        let fetched = vec![msg("1", "1", "hi", 0)];
        let received = vec![msg("2", "1", "hi", 5001)];
        assert_eq!(merge(&fetched, &received, NONE, window()).len(), 2);

        // Exactly on the window edge is not "under" the window either.
        let received = vec![msg("2", "1", "hi", 5000)];
        assert_eq!(merge(&fetched, &received, NONE, window()).len(), 2);
    }

    #[test]
    fn test_different_sender_or_content_not_deduped() {
        let fetched = vec![msg("1", "1", "hi", 0)];
        let received = vec![msg("2", "2", "hi", 10), msg("3", "1", "hi!", 20)];
        assert_eq!(merge(&fetched, &received, NONE, window()).len(), 3);
    }

    #[test]
    fn test_sorted_regardless_of_arrival() {
        let received = vec![
            msg("c", "1", "third", 30_000),
            msg("a", "1", "first", 10_000),
            msg("b", "2", "second", 20_000),
        ];
        let out = merge(NONE, &received, NONE, window());
        let ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let fetched = vec![msg("1", "1", "hi", 0), msg("2", "2", "yo", 100)];
        let received = vec![msg("3", "1", "hi", 1000), msg("4", "3", "new", 50)];
        let optimistic = vec![msg("temp-1", "1", "draft", 200).with_status(MessageStatus::Sending)];
        let first = merge(&fetched, &received, &optimistic, window());
        let second = merge(&fetched, &received, &optimistic, window());
        assert_eq!(first, second);
    }

    #[test]
    fn test_authoritative_copy_hides_optimistic() {
        let received = vec![msg("srv-9", "me", "hello", 50)];
        let optimistic = vec![msg("temp-0", "me", "hello", 0).with_status(MessageStatus::Sending)];
        let out = merge(NONE, &received, &optimistic, window());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "srv-9");
        assert_eq!(out[0].status, MessageStatus::Sent);
    }

    #[test]
    fn test_equal_timestamps_keep_concatenation_order() {
        let fetched = vec![msg("h", "2", "from history", 1000)];
        let received = vec![msg("l1", "3", "live one", 1000), msg("l2", "1", "live two", 1000)];
        let optimistic = vec![msg("temp-0", "me", "mine", 1000).with_status(MessageStatus::Sending)];
        let out = merge(&fetched, &received, &optimistic, window());
        let ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["h", "l1", "l2", "temp-0"]);
    }

    #[test]
    fn test_configurable_window() {
        let fetched = vec![msg("1", "1", "hi", 0)];
        let received = vec![msg("2", "1", "hi", 2000)];
        let out = merge(&fetched, &received, NONE, Duration::milliseconds(1000));
        assert_eq!(out.len(), 2);
    }
}
