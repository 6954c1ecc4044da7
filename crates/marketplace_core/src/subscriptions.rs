//! crates/marketplace_core/src/subscriptions.rs
//!
//! Topic bookkeeping for one realtime connection: which topics the user wants,
//! and which broker subscription currently serves each of them.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::ports::SubscriptionId;

pub const SEND_MESSAGE_DESTINATION: &str = "/app/chat.sendMessage";
pub const START_CONVERSATION_DESTINATION: &str = "/app/chat.startConversation";

pub fn notification_topic(user_id: Uuid) -> String {
    format!("/user/{}/queue/notifications", user_id)
}

pub fn conversation_topic(conversation_id: i64) -> String {
    format!("/topic/conversations/{}", conversation_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Notifications,
    Conversation(i64),
}

/// What to do when a connection (re)enters the connected state.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResubscribePlan {
    /// Handles left over from before; unsubscribe these first.
    pub stale: Vec<SubscriptionId>,
    /// Topics to subscribe, in a stable order.
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    desired: BTreeMap<String, TopicKind>,
    live: HashMap<String, SubscriptionId>,
}

impl SubscriptionSet {
    pub fn new(user_id: Uuid) -> Self {
        let mut set = Self::default();
        set.retarget(user_id);
        set
    }

    /// Points the notification topic at `user_id`. Returns the live handle
    /// of the previous user's topic, if there was one.
    pub fn retarget(&mut self, user_id: Uuid) -> Option<SubscriptionId> {
        let topic = notification_topic(user_id);
        if self.desired.contains_key(&topic) {
            return None;
        }
        let old = self
            .desired
            .iter()
            .find(|(_, kind)| **kind == TopicKind::Notifications)
            .map(|(topic, _)| topic.clone());
        self.desired.insert(topic, TopicKind::Notifications);
        old.and_then(|old| {
            self.desired.remove(&old);
            self.live.remove(&old)
        })
    }

    /// Adds a conversation topic. Returns the topic if it was not already wanted.
    pub fn watch_conversation(&mut self, conversation_id: i64) -> Option<String> {
        let topic = conversation_topic(conversation_id);
        if self.desired.contains_key(&topic) {
            return None;
        }
        self.desired
            .insert(topic.clone(), TopicKind::Conversation(conversation_id));
        Some(topic)
    }

    /// Drops a conversation topic. Returns its live handle so the caller can unsubscribe.
    pub fn unwatch_conversation(&mut self, conversation_id: i64) -> Option<SubscriptionId> {
        let topic = conversation_topic(conversation_id);
        self.desired.remove(&topic);
        self.live.remove(&topic)
    }

    /// Takes every live handle out as stale and lists every wanted topic.
    pub fn plan_resubscribe(&mut self) -> ResubscribePlan {
        ResubscribePlan {
            stale: self.live.drain().map(|(_, id)| id).collect(),
            topics: self.desired.keys().cloned().collect(),
        }
    }

    /// Records the handle serving `topic`. Returns a previous handle for the
    /// same topic, which the caller must unsubscribe.
    pub fn bind(&mut self, topic: &str, id: SubscriptionId) -> Option<SubscriptionId> {
        if !self.desired.contains_key(topic) {
            return Some(id);
        }
        self.live.insert(topic.to_string(), id)
    }

    /// Forgets all live handles, returning them for unsubscription.
    pub fn clear_live(&mut self) -> Vec<SubscriptionId> {
        self.live.drain().map(|(_, id)| id).collect()
    }

    /// Which topic a delivered message belongs to.
    pub fn resolve(&self, id: &SubscriptionId) -> Option<TopicKind> {
        self.live
            .iter()
            .find(|(_, live)| *live == id)
            .and_then(|(topic, _)| self.desired.get(topic).copied())
    }

    pub fn is_live(&self, topic: &str) -> bool {
        self.live.contains_key(topic)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.desired.keys().map(String::as_str)
    }
}
