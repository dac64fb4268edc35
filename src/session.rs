//! Per-channel CHARON conversation state.
//!
//! Each channel keeps an append-only conversation log, a queue of
//! AI drafts awaiting GM approval, and an optional GM read marker, all
//! stored in the TTL cache so a session evaporates a few hours after the
//! table goes quiet. Every mutation is an atomic transform against the
//! cache, so concurrent writers cannot drop each other's appends.

use crate::cache::TtlCache;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const KEY_PREFIX: &str = "charon";
const CHANNELS_KEY: &str = "charon:channels";

/// Channels that always exist, even before anyone has spoken on them.
pub const DEFAULT_CHANNELS: [&str; 2] = ["default", "bridge"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Charon,
    Pending,
}

/// One conversational turn. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub pending_approval: bool,
}

impl ChannelMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            pending_approval: false,
        }
    }
}

/// An AI draft awaiting GM disposition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub pending_id: String,
    pub query_id: String,
    pub query: String,
    pub response: String,
    pub timestamp: String,
}

/// Per-channel cursor recording what the GM has already seen.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadMarker {
    pub message_id: String,
    pub read_at: String,
    #[serde(default)]
    pub gm_user: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    cache: TtlCache,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: TtlCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn conversation_key(channel: &str) -> String {
        format!("{}:conversation:{}", KEY_PREFIX, channel)
    }

    fn pending_key(channel: &str) -> String {
        format!("{}:pending:{}", KEY_PREFIX, channel)
    }

    fn last_read_key(channel: &str) -> String {
        format!("{}:last_read:{}", KEY_PREFIX, channel)
    }

    fn seed_channels() -> Vec<String> {
        DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect()
    }

    /// Ordered message log for a channel; empty if the channel is unseen.
    pub fn conversation(&self, channel: &str) -> Vec<ChannelMessage> {
        self.cache
            .get_or(&Self::conversation_key(channel), Vec::new())
    }

    /// Appends a message and registers the channel as active.
    pub fn add_message(&self, channel: &str, message: ChannelMessage) {
        self.cache.update(
            &Self::conversation_key(channel),
            self.ttl,
            |log: &mut Vec<ChannelMessage>| log.push(message),
        );
        self.register_channel(channel);
    }

    pub fn pending(&self, channel: &str) -> Vec<PendingResponse> {
        self.cache.get_or(&Self::pending_key(channel), Vec::new())
    }

    /// Enqueues an AI draft for GM approval, returning its fresh id.
    pub fn add_pending(
        &self,
        channel: &str,
        query: &str,
        response: &str,
        query_id: &str,
    ) -> String {
        let item = PendingResponse {
            pending_id: Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            query: query.to_string(),
            response: response.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        let pending_id = item.pending_id.clone();
        self.cache.update(
            &Self::pending_key(channel),
            self.ttl,
            |queue: &mut Vec<PendingResponse>| queue.push(item),
        );
        pending_id
    }

    pub fn pending_by_id(&self, channel: &str, pending_id: &str) -> Option<PendingResponse> {
        self.pending(channel)
            .into_iter()
            .find(|p| p.pending_id == pending_id)
    }

    /// Approves a pending draft: the response (or the GM's edited version)
    /// is appended to the conversation as a `charon` message and the draft
    /// leaves the queue. Returns false when the id is unknown.
    ///
    /// Removal happens inside a single atomic transform, so racing
    /// approvals of the same id append at most one message.
    pub fn approve(
        &self,
        channel: &str,
        pending_id: &str,
        modified_content: Option<&str>,
    ) -> bool {
        let removed: Option<PendingResponse> = self.cache.update(
            &Self::pending_key(channel),
            self.ttl,
            |queue: &mut Vec<PendingResponse>| {
                queue
                    .iter()
                    .position(|p| p.pending_id == pending_id)
                    .map(|i| queue.remove(i))
            },
        );
        match removed {
            Some(item) => {
                let content = modified_content
                    .map(|c| c.to_string())
                    .unwrap_or(item.response);
                self.add_message(channel, ChannelMessage::new(Role::Charon, content));
                true
            }
            None => false,
        }
    }

    /// Drops a pending draft without appending anything.
    pub fn reject(&self, channel: &str, pending_id: &str) -> bool {
        self.cache.update(
            &Self::pending_key(channel),
            self.ttl,
            |queue: &mut Vec<PendingResponse>| {
                let before = queue.len();
                queue.retain(|p| p.pending_id != pending_id);
                queue.len() != before
            },
        )
    }

    /// Empties the conversation and pending queue. The channel stays in
    /// the registry.
    pub fn clear(&self, channel: &str) {
        self.cache.delete(&Self::conversation_key(channel));
        self.cache.delete(&Self::pending_key(channel));
    }

    /// Idempotent append to the channel registry.
    pub fn register_channel(&self, channel: &str) {
        self.cache
            .update(CHANNELS_KEY, self.ttl, |list: &mut Vec<String>| {
                if list.is_empty() {
                    *list = Self::seed_channels();
                }
                if !list.iter().any(|c| c == channel) {
                    list.push(channel.to_string());
                }
            });
    }

    pub fn channels(&self) -> Vec<String> {
        let list: Vec<String> = self.cache.get_or(CHANNELS_KEY, Vec::new());
        if list.is_empty() {
            Self::seed_channels()
        } else {
            list
        }
    }

    /// Unread count for GM channel summaries.
    ///
    /// With a marker id: messages strictly after that id's position (0 if
    /// the id is not in the log). Without: user messages not immediately
    /// followed by a charon reply. The implicit heuristic assumes strict
    /// user/charon alternation and undercounts back-to-back user queries.
    pub fn unread_count(&self, channel: &str, last_read_id: Option<&str>) -> usize {
        let log = self.conversation(channel);
        match last_read_id {
            Some(marker_id) => log
                .iter()
                .position(|m| m.id == marker_id)
                .map(|pos| log.len() - pos - 1)
                .unwrap_or(0),
            None => log
                .iter()
                .enumerate()
                .filter(|(i, m)| {
                    m.role == Role::User
                        && log.get(i + 1).map(|next| next.role) != Some(Role::Charon)
                })
                .count(),
        }
    }

    /// Points the channel's read marker at its current last message.
    /// No-op when the conversation is empty.
    pub fn mark_read(&self, channel: &str, gm_user: Option<&str>) {
        let log = self.conversation(channel);
        let Some(last) = log.last() else {
            return;
        };
        let marker = ReadMarker {
            message_id: last.id.clone(),
            read_at: Utc::now().to_rfc3339(),
            gm_user: gm_user.map(|u| u.to_string()),
        };
        self.cache
            .set(&Self::last_read_key(channel), &marker, self.ttl);
    }

    pub fn last_read(&self, channel: &str) -> Option<ReadMarker> {
        self.cache.get(&Self::last_read_key(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(TtlCache::new(), Duration::from_secs(60))
    }

    fn user_msg(content: &str) -> ChannelMessage {
        ChannelMessage::new(Role::User, content)
    }

    #[test]
    fn test_append_only_order() {
        let store = store();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Charon };
            store.add_message("story", ChannelMessage::new(role, format!("m{}", i)));
        }
        let log = store.conversation("story");
        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_unseen_channel_is_empty() {
        let store = store();
        assert!(store.conversation("nowhere").is_empty());
        assert!(store.pending("nowhere").is_empty());
        assert_eq!(store.unread_count("nowhere", None), 0);
        assert!(store.last_read("nowhere").is_none());
    }

    #[test]
    fn test_approve_appends_stored_response() {
        let store = store();
        let id = store.add_pending("story", "who are you", "I am CHARON.", "q1");
        assert!(store.approve("story", &id, None));

        let log = store.conversation("story");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::Charon);
        assert_eq!(log[0].content, "I am CHARON.");
        assert!(store.pending("story").is_empty());
    }

    #[test]
    fn test_approve_with_gm_edit() {
        let store = store();
        let id = store.add_pending("story", "q", "draft text", "q1");
        assert!(store.approve("story", &id, Some("edited text")));
        assert_eq!(store.conversation("story")[0].content, "edited text");
    }

    #[test]
    fn test_double_approve_appends_once() {
        let store = store();
        let id = store.add_pending("story", "q", "r", "q1");
        assert!(store.approve("story", &id, None));
        assert!(!store.approve("story", &id, None));
        assert_eq!(store.conversation("story").len(), 1);
    }

    #[test]
    fn test_reject_is_silent() {
        let store = store();
        let id = store.add_pending("story", "q", "r", "q1");
        assert!(store.reject("story", &id));
        assert!(store.conversation("story").is_empty());
        assert!(store.pending("story").is_empty());

        assert!(!store.reject("story", "no-such-id"));
        assert!(store.conversation("story").is_empty());
    }

    #[test]
    fn test_pending_by_id() {
        let store = store();
        let id = store.add_pending("story", "q", "r", "q1");
        let item = store.pending_by_id("story", &id).unwrap();
        assert_eq!(item.query, "q");
        assert_eq!(item.query_id, "q1");
        assert!(store.pending_by_id("story", "missing").is_none());
    }

    #[test]
    fn test_unread_heuristic_without_marker() {
        let store = store();
        store.add_message("story", user_msg("a"));
        store.add_message("story", ChannelMessage::new(Role::Charon, "b"));
        store.add_message("story", user_msg("c"));
        assert_eq!(store.unread_count("story", None), 1);
    }

    #[test]
    fn test_unread_with_marker() {
        let store = store();
        store.add_message("story", user_msg("a"));
        store.add_message("story", ChannelMessage::new(Role::Charon, "b"));
        store.add_message("story", user_msg("c"));
        let first_id = store.conversation("story")[0].id.clone();
        assert_eq!(store.unread_count("story", Some(&first_id)), 2);
        assert_eq!(store.unread_count("story", Some("unknown-id")), 0);
    }

    #[test]
    fn test_mark_read_points_at_last_message() {
        let store = store();
        store.mark_read("story", None);
        assert!(store.last_read("story").is_none());

        store.add_message("story", user_msg("a"));
        store.add_message("story", user_msg("b"));
        store.mark_read("story", Some("gm"));
        let marker = store.last_read("story").unwrap();
        assert_eq!(marker.message_id, store.conversation("story")[1].id);
        assert_eq!(marker.gm_user.as_deref(), Some("gm"));
        assert_eq!(store.unread_count("story", Some(&marker.message_id)), 0);
    }

    #[test]
    fn test_channel_isolation() {
        let store = store();
        store.add_message("bridge", user_msg("bridge only"));
        store.add_pending("bridge", "q", "r", "q1");
        assert!(store.conversation("story").is_empty());
        assert!(store.pending("story").is_empty());
    }

    #[test]
    fn test_registry_seeded_and_idempotent() {
        let store = store();
        assert_eq!(store.channels(), vec!["default", "bridge"]);

        store.add_message("story", user_msg("hi"));
        store.register_channel("story");
        let channels = store.channels();
        assert_eq!(channels, vec!["default", "bridge", "story"]);
    }

    #[test]
    fn test_clear_keeps_registration() {
        let store = store();
        store.add_message("story", user_msg("hi"));
        store.add_pending("story", "q", "r", "q1");
        store.clear("story");
        assert!(store.conversation("story").is_empty());
        assert!(store.pending("story").is_empty());
        assert!(store.channels().contains(&"story".to_string()));
    }

    #[test]
    fn test_many_pending_disposed_in_any_order() {
        let store = store();
        let a = store.add_pending("story", "qa", "ra", "1");
        let b = store.add_pending("story", "qb", "rb", "2");
        let c = store.add_pending("story", "qc", "rc", "3");
        assert!(store.reject("story", &b));
        assert!(store.approve("story", &c, None));
        assert!(store.approve("story", &a, None));
        assert!(store.pending("story").is_empty());
        let log = store.conversation("story");
        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["rc", "ra"]);
    }
}
