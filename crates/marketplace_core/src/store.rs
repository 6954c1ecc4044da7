//! crates/marketplace_core/src/store.rs
//!
//! The merge and de-duplication core behind the notification store. Realtime
//! pushes and polled REST snapshots for the same conversation collapse into one
//! record keyed by [`NotificationKey`]; records stay sorted newest first.

use std::collections::{hash_map::Entry as Slot, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::domain::{NotificationEvent, NotificationKey, NotificationRecord, RemoteNotification};

/// Realtime timestamps remembered per record for de-duplication.
const SEEN_WINDOW: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    record: NotificationRecord,
    /// Unread realtime event timestamps already folded into this record,
    /// bounded to the newest `SEEN_WINDOW`.
    seen: BTreeSet<DateTime<Utc>>,
}

impl Entry {
    /// Remembers `timestamp`. Returns `false` for a replay, for anything a
    /// read already covers, and for events older than a full window.
    fn remember(&mut self, timestamp: DateTime<Utc>) -> bool {
        if self.record.read_covers(timestamp) {
            return false;
        }
        let full = self.seen.len() >= SEEN_WINDOW;
        if full && self.seen.first().is_some_and(|oldest| timestamp < *oldest) {
            return false;
        }
        if !self.seen.insert(timestamp) {
            return false;
        }
        if self.seen.len() > SEEN_WINDOW {
            self.seen.pop_first();
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationSet {
    entries: Vec<Entry>,
}

impl NotificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one realtime event in. Returns `false` if this exact event
    /// (same key and timestamp) was already ingested.
    pub fn ingest(&mut self, event: &NotificationEvent) -> bool {
        let key = event.key();
        match self.position(&key) {
            Some(index) => {
                let entry = &mut self.entries[index];
                if !entry.remember(event.timestamp) {
                    return false;
                }
                let record = &mut entry.record;
                record.from_realtime = true;
                record.live_unread = record.live_unread.saturating_add(1);
                if event.timestamp >= record.timestamp {
                    record.timestamp = event.timestamp;
                    record.message = event.message.clone();
                    record.sender_id = event.sender_id;
                    record.recipient_id = event.recipient_id;
                }
            }
            None => {
                let seen = BTreeSet::from([event.timestamp]);
                self.entries.push(Entry {
                    record: NotificationRecord {
                        key,
                        kind: event.kind.clone(),
                        sender_id: event.sender_id,
                        recipient_id: event.recipient_id,
                        message: event.message.clone(),
                        related_entity: event.related_entity.clone(),
                        timestamp: event.timestamp,
                        rest_unread: 0,
                        live_unread: 1,
                        read_at: None,
                        from_rest: false,
                        from_realtime: true,
                    },
                    seen,
                });
            }
        }
        self.sort();
        true
    }

    /// Replaces the REST-sourced part of the set with a fresh poll result.
    /// Records only ever seen over the realtime channel are left alone.
    pub fn apply_rest_snapshot(&mut self, remote: Vec<RemoteNotification>) {
        let mut incoming: HashMap<NotificationKey, RemoteNotification> = HashMap::new();
        for notification in remote {
            match incoming.entry(notification.key()) {
                Slot::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.unread_count =
                        existing.unread_count.saturating_add(notification.unread_count);
                    if notification.timestamp > existing.timestamp {
                        existing.timestamp = notification.timestamp;
                        existing.message = notification.message;
                        existing.sender_id = notification.sender_id;
                        existing.recipient_id = notification.recipient_id;
                    }
                }
                Slot::Vacant(slot) => {
                    slot.insert(notification);
                }
            }
        }

        self.entries.retain_mut(|entry| {
            if incoming.contains_key(&entry.record.key) {
                return true;
            }
            entry.record.rest_unread = 0;
            entry.record.from_rest = false;
            entry.record.from_realtime
        });

        for (key, notification) in incoming {
            match self.position(&key) {
                Some(index) => {
                    let record = &mut self.entries[index].record;
                    record.from_rest = true;
                    record.rest_unread = if record.read_covers(notification.timestamp) {
                        0
                    } else {
                        notification.unread_count
                    };
                    if notification.timestamp > record.timestamp {
                        record.timestamp = notification.timestamp;
                        record.message = notification.message;
                        record.sender_id = notification.sender_id;
                        record.recipient_id = notification.recipient_id;
                    }
                }
                None => self.entries.push(Entry {
                    record: NotificationRecord {
                        key,
                        kind: notification.kind,
                        sender_id: notification.sender_id,
                        recipient_id: notification.recipient_id,
                        message: notification.message,
                        related_entity: notification.related_entity,
                        timestamp: notification.timestamp,
                        rest_unread: notification.unread_count,
                        live_unread: 0,
                        read_at: None,
                        from_rest: true,
                        from_realtime: false,
                    },
                    seen: BTreeSet::new(),
                }),
            }
        }
        self.sort();
    }

    /// Clears the unread count of one record. Returns `true` if anything was unread.
    pub fn mark_read(&mut self, key: &NotificationKey) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        let entry = &mut self.entries[index];
        let record = &mut entry.record;
        let had_unread = !record.is_read();
        record.rest_unread = 0;
        record.live_unread = 0;
        let read_at = record.read_at.map_or(record.timestamp, |at| at.max(record.timestamp));
        record.read_at = Some(read_at);
        // Everything up to the read mark is now rejected by `read_covers`.
        entry.seen.retain(|timestamp| *timestamp > read_at);
        had_unread
    }

    pub fn remove(&mut self, key: &NotificationKey) -> Option<NotificationRecord> {
        let index = self.position(key)?;
        Some(self.entries.remove(index).record)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, key: &NotificationKey) -> Option<&NotificationRecord> {
        self.position(key).map(|index| &self.entries[index].record)
    }

    /// All records, newest first.
    pub fn records(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_total(&self) -> u32 {
        self.records()
            .fold(0u32, |total, record| total.saturating_add(record.unread_count()))
    }

    fn position(&self, key: &NotificationKey) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.record.key == key)
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
    }
}
