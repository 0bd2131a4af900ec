use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent<K> {
    /// `set` on a key with no live entry
    Inserted { key: K, timestamp: u64 },
    /// `set` replaced a live entry
    Updated { key: K, timestamp: u64 },
    /// `delete` removed an entry
    Removed { key: K, timestamp: u64 },
    /// `release` handed a live entry back to the caller
    Released { key: K, timestamp: u64 },
    /// An expired entry was reclaimed, lazily or by a sweep
    Expired { key: K, timestamp: u64 },
}

impl<K> MapEvent<K> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Inserted { key, .. }
            | MapEvent::Updated { key, .. }
            | MapEvent::Removed { key, .. }
            | MapEvent::Released { key, .. }
            | MapEvent::Expired { key, .. } => key,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            MapEvent::Inserted { timestamp, .. }
            | MapEvent::Updated { timestamp, .. }
            | MapEvent::Removed { timestamp, .. }
            | MapEvent::Released { timestamp, .. }
            | MapEvent::Expired { timestamp, .. } => *timestamp,
        }
    }
}

/// Helper to get current timestamp in milliseconds since UNIX epoch
pub fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Fan-out of map events. Events are only built when someone is listening.
pub(crate) struct Notifier<K> {
    tx: broadcast::Sender<MapEvent<K>>,
}

impl<K: Clone> Notifier<K> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<MapEvent<K>> {
        self.tx.subscribe()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    pub(crate) fn publish<F>(&self, make: F)
    where
        F: FnOnce(u64) -> MapEvent<K>,
    {
        if self.is_active() {
            // A receiver may drop between the check and the send; nothing to do then
            let _ = self.tx.send(make(now_timestamp_ms()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MapEvent::Inserted {
            key: "session-1".to_string(),
            timestamp: 42,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "inserted");
        assert_eq!(json["key"], "session-1");
        assert_eq!(json["timestamp"], 42);

        let back: MapEvent<String> = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let notifier: Notifier<u32> = Notifier::new();
        assert!(!notifier.is_active());

        // The closure must not even run when nobody listens
        notifier.publish(|_| panic!("event built without subscribers"));
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let notifier: Notifier<u32> = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(|timestamp| MapEvent::Expired { key: 7, timestamp });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key(), &7);
        assert!(matches!(event, MapEvent::Expired { .. }));
    }
}
