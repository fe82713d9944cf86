use std::collections::BTreeMap;

use chrono::Duration;
use tracing::{debug, trace};

use crate::merge::{find_match, merge, DEFAULT_DEDUP_WINDOW_MS};
use crate::message::{Message, MessageStatus};

/// Maximum live messages to keep per room before trimming
pub const MAX_RECEIVED_MESSAGES: usize = 2000;
/// Number of oldest live messages to remove when trimming
pub const RECEIVED_TRIM_COUNT: usize = 500;

/// Bounds on the live-received sequence of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_received: usize,
    pub trim_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_received: MAX_RECEIVED_MESSAGES,
            trim_count: RECEIVED_TRIM_COUNT,
        }
    }
}

/// How a failed send was finally resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A delivered copy showed up anyway; the temporary entry was removed
    Delivered,
    /// No delivered copy; the temporary entry is now `Failed`
    Failed,
    /// The temporary entry no longer exists
    Unknown,
}

/// Message state of a single room: history, live events and optimistic sends.
///
/// The three sources are owned here and only mutated through the methods
/// below; the merged view is derived and cached per revision.
#[derive(Debug, Clone)]
pub struct RoomTimeline {
    pub room_id: String,
    fetched: Vec<Message>,
    received: Vec<Message>,
    /// Optimistic messages keyed by temporary id
    optimistic: BTreeMap<String, Message>,
    window: Duration,
    retention: RetentionPolicy,
    /// Bumped on every input change
    revision: u64,
    view: Option<(u64, Vec<Message>)>,
    /// Whether the history load completed
    pub history_loaded: bool,
    /// Error banner (history load failure)
    pub banner: Option<String>,
    /// Number of live messages received while the room was not active
    pub unread_count: usize,
    scroll_to_bottom: bool,
}

impl RoomTimeline {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_options(
            room_id,
            Duration::milliseconds(DEFAULT_DEDUP_WINDOW_MS),
            RetentionPolicy::default(),
        )
    }

    pub fn with_options(
        room_id: impl Into<String>,
        window: Duration,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            fetched: Vec::new(),
            received: Vec::new(),
            optimistic: BTreeMap::new(),
            window,
            retention,
            revision: 0,
            view: None,
            history_loaded: false,
            banner: None,
            unread_count: 0,
            scroll_to_bottom: false,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Replace the history with a fresh load.
    pub fn set_history(&mut self, messages: Vec<Message>) {
        debug!(room_id = %self.room_id, count = messages.len(), "history loaded");
        self.fetched = messages;
        self.history_loaded = true;
        self.banner = None;
        self.compact_received();
        self.touch();
    }

    /// Record a failed history load; existing messages stay as they are.
    pub fn set_history_error(&mut self, error: impl Into<String>) {
        self.banner = Some(error.into());
    }

    /// Append a live message.
    pub fn push_received(&mut self, msg: Message, is_active: bool) {
        trace!(room_id = %self.room_id, id = %msg.id, "live message");
        self.received.push(msg);
        if !is_active {
            self.unread_count += 1;
        }
        // Trim old live messages if the room gets too large
        if self.received.len() > self.retention.max_received {
            let n = self.retention.trim_count.clamp(1, self.received.len());
            self.received.drain(0..n);
            debug!(room_id = %self.room_id, trimmed = n, "received messages trimmed");
        }
        self.touch();
    }

    /// Drop live messages already covered by history.
    ///
    /// A live message that still pairs with an optimistic entry is kept:
    /// it may be the only copy close enough for `resolve_failed` to find.
    fn compact_received(&mut self) {
        let window = self.window;
        let fetched = &self.fetched;
        let optimistic = &self.optimistic;
        let before = self.received.len();
        self.received.retain(|m| {
            find_match(m, fetched.iter(), window).is_none()
                || find_match(m, optimistic.values(), window).is_some()
        });
        let dropped = before - self.received.len();
        if dropped > 0 {
            trace!(room_id = %self.room_id, dropped, "received compacted against history");
        }
    }

    /// Add an optimistic entry and request a scroll to the bottom.
    pub fn add_optimistic(&mut self, msg: Message) {
        debug!(room_id = %self.room_id, temp_id = %msg.id, "optimistic message added");
        self.optimistic.insert(msg.id.clone(), msg);
        self.scroll_to_bottom = true;
        self.touch();
    }

    /// Remove a confirmed optimistic entry. Returns whether it existed.
    pub fn confirm_sent(&mut self, temp_id: &str) -> bool {
        let removed = self.optimistic.remove(temp_id).is_some();
        if removed {
            debug!(room_id = %self.room_id, %temp_id, "optimistic message confirmed");
            self.touch();
        }
        removed
    }

    /// Resolve a send that reported failure.
    ///
    /// If history or live messages hold a matching copy the failure was a
    /// false negative and the entry is removed; otherwise it is marked
    /// `Failed` and stays visible.
    pub fn resolve_failed(&mut self, temp_id: &str) -> SendOutcome {
        let Some(temp) = self.optimistic.get(temp_id) else {
            return SendOutcome::Unknown;
        };
        let delivered = find_match(
            temp,
            self.fetched.iter().chain(self.received.iter()),
            self.window,
        )
        .is_some();

        let outcome = if delivered {
            self.optimistic.remove(temp_id);
            SendOutcome::Delivered
        } else if let Some(entry) = self.optimistic.get_mut(temp_id) {
            entry.status = MessageStatus::Failed;
            SendOutcome::Failed
        } else {
            SendOutcome::Unknown
        };
        debug!(room_id = %self.room_id, %temp_id, ?outcome, "failed send resolved");
        self.touch();
        outcome
    }

    /// Take a `Failed` entry out so it can be resubmitted.
    pub fn take_failed(&mut self, temp_id: &str) -> Option<Message> {
        let failed = self
            .optimistic
            .get(temp_id)
            .is_some_and(|m| m.status == MessageStatus::Failed);
        if !failed {
            return None;
        }
        let msg = self.optimistic.remove(temp_id);
        self.touch();
        msg
    }

    pub fn has_optimistic(&self, temp_id: &str) -> bool {
        self.optimistic.contains_key(temp_id)
    }

    pub fn optimistic_ids(&self) -> impl Iterator<Item = &str> {
        self.optimistic.keys().map(String::as_str)
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    /// Merged view, recomputed only when an input changed.
    pub fn messages(&mut self) -> &[Message] {
        let stale = !matches!(&self.view, Some((rev, _)) if *rev == self.revision);
        if stale {
            self.view = Some((self.revision, self.merged()));
        }
        match &self.view {
            Some((_, msgs)) => msgs,
            None => &[],
        }
    }

    /// Merged view computed from scratch.
    pub fn merged(&self) -> Vec<Message> {
        merge(
            &self.fetched,
            &self.received,
            self.optimistic.values(),
            self.window,
        )
    }

    /// Consume a pending scroll-to-bottom request.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_to_bottom)
    }

    pub fn clear_unread(&mut self) {
        self.unread_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn sent(id: &str, sender: &str, content: &str, ms: i64) -> Message {
        Message {
            id: id.into(),
            sender_id: sender.into(),
            content: content.into(),
            created_at: at(ms),
            status: MessageStatus::Sent,
            room_id: Some("r1".into()),
        }
    }

    #[test]
    fn test_optimistic_then_echo_then_confirm() {
        let mut tl = RoomTimeline::new("r1");
        tl.set_history(vec![]);
        tl.add_optimistic(Message::optimistic("temp-0".into(), "me", "hello", "r1", at(0)));
        assert_eq!(tl.messages().len(), 1);
        assert_eq!(tl.messages()[0].status, MessageStatus::Sending);

        tl.push_received(sent("srv-1", "me", "hello", 50), true);
        assert_eq!(tl.messages().len(), 1);
        assert_eq!(tl.messages()[0].id, "srv-1");

        assert!(tl.confirm_sent("temp-0"));
        assert_eq!(tl.optimistic_ids().count(), 0);
        assert_eq!(tl.messages().len(), 1);
        assert!(!tl.confirm_sent("temp-0"));
    }

    #[test]
    fn test_resolve_failed_without_match_marks_failed() {
        let mut tl = RoomTimeline::new("r1");
        tl.add_optimistic(Message::optimistic("temp-0".into(), "me", "lost", "r1", at(0)));
        assert_eq!(tl.resolve_failed("temp-0"), SendOutcome::Failed);
        let msgs = tl.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].status, MessageStatus::Failed);
        assert_eq!(msgs[0].id, "temp-0");
    }

    #[test]
    fn test_resolve_failed_with_late_echo_is_delivered() {
        let mut tl = RoomTimeline::new("r1");
        tl.add_optimistic(Message::optimistic("temp-0".into(), "me", "made it", "r1", at(0)));
        tl.push_received(sent("srv-7", "me", "made it", 1200), true);
        assert_eq!(tl.resolve_failed("temp-0"), SendOutcome::Delivered);
        assert!(!tl.has_optimistic("temp-0"));
        assert_eq!(tl.messages().len(), 1);
        assert_eq!(tl.resolve_failed("temp-0"), SendOutcome::Unknown);
    }

    #[test]
    fn test_take_failed_only_for_failed_entries() {
        let mut tl = RoomTimeline::new("r1");
        tl.add_optimistic(Message::optimistic("temp-0".into(), "me", "x", "r1", at(0)));
        assert!(tl.take_failed("temp-0").is_none());
        tl.resolve_failed("temp-0");
        let taken = tl.take_failed("temp-0").unwrap();
        assert_eq!(taken.content, "x");
        assert!(tl.messages().is_empty());
    }

    #[test]
    fn test_received_trim() {
        let policy = RetentionPolicy {
            max_received: 10,
            trim_count: 4,
        };
        let mut tl = RoomTimeline::with_options("r1", Duration::milliseconds(5000), policy);
        for i in 0..11 {
            tl.push_received(sent(&format!("m{}", i), "a", &format!("msg{}", i), i * 10_000), false);
        }
        assert_eq!(tl.received_len(), 7);
        assert_eq!(tl.unread_count, 11);
        assert_eq!(tl.messages()[0].id, "m4");
    }

    #[test]
    fn test_history_compacts_received_duplicates() {
        let mut tl = RoomTimeline::new("r1");
        tl.push_received(sent("live-1", "a", "hi", 1000), true);
        tl.push_received(sent("live-2", "b", "other", 1000), true);
        tl.set_history(vec![sent("h-1", "a", "hi", 0)]);
        assert_eq!(tl.received_len(), 1);
        let ids: Vec<_> = tl.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["h-1", "live-2"]);
    }

    #[test]
    fn test_history_keeps_echo_needed_by_pending_send() {
        let mut tl = RoomTimeline::new("r1");
        tl.push_received(sent("srv-2", "me", "ok", 4000), true);
        tl.add_optimistic(Message::optimistic("temp-1".into(), "me", "ok", "r1", at(8500)));
        // srv-1 covers srv-2 but is too old to match the temp entry
        tl.set_history(vec![sent("srv-1", "me", "ok", 0)]);
        assert_eq!(tl.received_len(), 1);
        assert_eq!(tl.resolve_failed("temp-1"), SendOutcome::Delivered);
        assert!(!tl.has_optimistic("temp-1"));
    }

    #[test]
    fn test_view_cache_follows_revision() {
        let mut tl = RoomTimeline::new("r1");
        let r0 = tl.revision();
        assert!(tl.messages().is_empty());
        tl.push_received(sent("m1", "a", "x", 0), true);
        assert!(tl.revision() > r0);
        assert_eq!(tl.messages().len(), 1);
        let fresh = tl.merged();
        assert_eq!(tl.messages(), fresh.as_slice());
    }

    #[test]
    fn test_history_error_banner_cleared_by_load() {
        let mut tl = RoomTimeline::new("r1");
        tl.set_history_error("boom");
        assert_eq!(tl.banner.as_deref(), Some("boom"));
        tl.set_history(vec![]);
        assert!(tl.banner.is_none());
    }

    #[test]
    fn test_scroll_request_consumed_once() {
        let mut tl = RoomTimeline::new("r1");
        tl.add_optimistic(Message::optimistic("temp-0".into(), "me", "x", "r1", at(0)));
        assert!(tl.take_scroll_request());
        assert!(!tl.take_scroll_request());
    }
}
