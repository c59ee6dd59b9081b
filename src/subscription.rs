use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SubscribeMode;

/// Upper bound on the per-conversation fallback history cache.
pub const HISTORY_CACHE_LIMIT: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        ChatTurn {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Per-conversation subscription record. The whole struct persists as part
/// of the state snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub subscribed: bool,
    #[serde(default)]
    pub mode: SubscribeMode,
    /// Last message in either direction. The interval trigger measures
    /// idle time from here; a successful proactive send resets it.
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Last inbound user message. Idle auto-unsubscribe watches this one.
    #[serde(default)]
    pub last_user_reply_at: Option<DateTime<Utc>>,
    /// Kind + minute bucket of the most recent firing, the dedup guard.
    #[serde(default)]
    pub last_fired_tag: Option<String>,
    /// Bounded fallback context used when the external history provider
    /// is unavailable.
    #[serde(default)]
    pub history: VecDeque<ChatTurn>,
    /// Proactive sends that failed to dispatch since the user last spoke.
    #[serde(default)]
    pub consecutive_no_reply: u32,
    /// Set when the idle policy (not an explicit unwatch) unsubscribed
    /// this conversation; any inbound message then re-subscribes it.
    #[serde(default)]
    pub idle_expired: bool,
}

impl Default for Subscription {
    fn default() -> Self {
        Subscription {
            subscribed: false,
            mode: SubscribeMode::Manual,
            last_activity_at: None,
            last_user_reply_at: None,
            last_fired_tag: None,
            history: VecDeque::new(),
            consecutive_no_reply: 0,
            idle_expired: false,
        }
    }
}

impl Subscription {
    /// Record an inbound user message: refresh both timestamps, reset the
    /// no-reply counter, cache the turn, and re-subscribe when the mode is
    /// auto or the record was idle-expired rather than explicitly unwatched.
    pub fn note_user_message(&mut self, now: DateTime<Utc>, mode: SubscribeMode, content: &str) {
        self.last_activity_at = Some(now);
        self.last_user_reply_at = Some(now);
        self.consecutive_no_reply = 0;
        self.mode = mode;
        if mode == SubscribeMode::Auto || self.idle_expired {
            self.subscribed = true;
            self.idle_expired = false;
        }
        if !content.is_empty() {
            self.push_turn(ChatTurn::new("user", content));
        }
    }

    /// A proactive message went out; the idle timer restarts from now.
    pub fn note_proactive_sent(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
    }

    pub fn push_turn(&mut self, turn: ChatTurn) {
        self.history.push_back(turn);
        while self.history.len() > HISTORY_CACHE_LIMIT {
            self.history.pop_front();
        }
    }

    pub fn watch(&mut self, mode: SubscribeMode) {
        self.subscribed = true;
        self.mode = mode;
        self.idle_expired = false;
    }

    pub fn unwatch(&mut self) {
        self.subscribed = false;
        self.idle_expired = false;
    }

    /// Idle auto-unsubscribe check. Returns true when the record flipped
    /// to unsubscribed on this call.
    pub fn expire_if_idle(&mut self, now: DateTime<Utc>, max_no_reply_days: u64) -> bool {
        if max_no_reply_days == 0 || !self.subscribed {
            return false;
        }
        let Some(last) = self.last_user_reply_at else {
            return false;
        };
        if now - last >= chrono::Duration::days(max_no_reply_days as i64) {
            self.subscribed = false;
            self.idle_expired = true;
            true
        } else {
            false
        }
    }

    /// The newest `depth` cached turns, oldest first.
    pub fn recent_turns(&self, depth: usize) -> Vec<ChatTurn> {
        if depth == 0 {
            return Vec::new();
        }
        let skip = self.history.len().saturating_sub(depth);
        self.history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_initial_state_is_unsubscribed() {
        let sub = Subscription::default();
        assert!(!sub.subscribed);
        assert_eq!(sub.mode, SubscribeMode::Manual);
        assert!(sub.last_user_reply_at.is_none());
    }

    #[test]
    fn test_auto_mode_message_subscribes() {
        let mut sub = Subscription::default();
        sub.note_user_message(at(1, 10), SubscribeMode::Auto, "hi");
        assert!(sub.subscribed);
        assert_eq!(sub.last_user_reply_at, Some(at(1, 10)));
        assert_eq!(sub.history.len(), 1);
    }

    #[test]
    fn test_manual_mode_message_does_not_subscribe() {
        let mut sub = Subscription::default();
        sub.note_user_message(at(1, 10), SubscribeMode::Manual, "hi");
        assert!(!sub.subscribed);
        // Timestamps still tracked.
        assert_eq!(sub.last_activity_at, Some(at(1, 10)));
    }

    #[test]
    fn test_explicit_unwatch_sticks_in_manual_mode() {
        let mut sub = Subscription::default();
        sub.watch(SubscribeMode::Manual);
        sub.unwatch();
        sub.note_user_message(at(1, 10), SubscribeMode::Manual, "hi");
        assert!(!sub.subscribed);
        sub.watch(SubscribeMode::Manual);
        assert!(sub.subscribed);
    }

    #[test]
    fn test_idle_expiry_after_threshold() {
        let mut sub = Subscription::default();
        sub.watch(SubscribeMode::Auto);
        sub.last_user_reply_at = Some(at(1, 0));
        // 8 days later with a 7 day threshold.
        assert!(sub.expire_if_idle(at(9, 0), 7));
        assert!(!sub.subscribed);
        assert!(sub.idle_expired);
        // Not yet expired one day in.
        let mut fresh = Subscription::default();
        fresh.watch(SubscribeMode::Auto);
        fresh.last_user_reply_at = Some(at(1, 0));
        assert!(!fresh.expire_if_idle(at(2, 0), 7));
        assert!(fresh.subscribed);
    }

    #[test]
    fn test_idle_expiry_disabled_when_zero() {
        let mut sub = Subscription::default();
        sub.watch(SubscribeMode::Auto);
        sub.last_user_reply_at = Some(at(1, 0));
        assert!(!sub.expire_if_idle(at(30, 0), 0));
        assert!(sub.subscribed);
    }

    #[test]
    fn test_idle_expired_record_reactivates_on_message_even_in_manual_mode() {
        let mut sub = Subscription::default();
        sub.watch(SubscribeMode::Manual);
        sub.last_user_reply_at = Some(at(1, 0));
        assert!(sub.expire_if_idle(at(9, 0), 7));
        sub.note_user_message(at(9, 1), SubscribeMode::Manual, "back");
        assert!(sub.subscribed);
        assert!(!sub.idle_expired);
    }

    #[test]
    fn test_history_cache_is_bounded() {
        let mut sub = Subscription::default();
        for i in 0..(HISTORY_CACHE_LIMIT + 5) {
            sub.push_turn(ChatTurn::new("user", format!("m{i}")));
        }
        assert_eq!(sub.history.len(), HISTORY_CACHE_LIMIT);
        assert_eq!(sub.history.front().unwrap().content, "m5");
    }

    #[test]
    fn test_recent_turns_truncates_oldest() {
        let mut sub = Subscription::default();
        for i in 0..10 {
            sub.push_turn(ChatTurn::new("user", format!("m{i}")));
        }
        let turns = sub.recent_turns(3);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "m7");
        assert_eq!(turns[2].content, "m9");
        assert!(sub.recent_turns(0).is_empty());
    }

    #[test]
    fn test_failed_dispatch_counter_resets_on_user_message() {
        let mut sub = Subscription::default();
        sub.consecutive_no_reply = 3;
        sub.note_user_message(at(1, 10), SubscribeMode::Auto, "hi");
        assert_eq!(sub.consecutive_no_reply, 0);
    }
}
