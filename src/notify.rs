//! Invalidation boundary: after a committed state change the services tell
//! dependent read views which of them are stale. Delivery is best effort.

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;

use crate::models::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PendingListings,
    Catalog,
    Listing(Id),
    PendingMessages,
    Conversation(Id),
    /// Favorites list of one user.
    Favorites(Id),
}

impl Topic {
    /// Label used for metrics; carries no ids.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::PendingListings => "pending_listings",
            Topic::Catalog => "catalog",
            Topic::Listing(_) => "listing",
            Topic::PendingMessages => "pending_messages",
            Topic::Conversation(_) => "conversation",
            Topic::Favorites(_) => "favorites",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Listing(id) => write!(f, "listing:{id}"),
            Topic::Conversation(id) => write!(f, "conversation:{id}"),
            Topic::Favorites(id) => write!(f, "favorites:{id}"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("invalidation delivery failed: {0}")]
pub struct NotifyError(pub String);

pub trait InvalidationSink: Send + Sync {
    fn notify(&self, topic: Topic, payload: Value) -> Result<(), NotifyError>;
}

/// Default sink: records the signal in logs and metrics. Push delivery to
/// clients lives outside this service.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl InvalidationSink for TracingSink {
    fn notify(&self, topic: Topic, payload: Value) -> Result<(), NotifyError> {
        tracing::debug!(topic = %topic, %payload, "invalidate");
        metrics::increment_counter!("bazaar_invalidations_total", "topic" => topic.name());
        Ok(())
    }
}

/// Keeps every signal in memory; used by tests to assert side effects.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Topic, Value)>>,
}

impl RecordingSink {
    pub fn topics(&self) -> Vec<Topic> {
        self.events
            .lock()
            .map(|e| e.iter().map(|(t, _)| *t).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }
}

impl InvalidationSink for RecordingSink {
    fn notify(&self, topic: Topic, payload: Value) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|_| NotifyError("recorder poisoned".into()))?
            .push((topic, payload));
        Ok(())
    }
}

/// Fire and forget: a failed signal is logged and never fails the caller.
pub fn signal(sink: &dyn InvalidationSink, topics: &[Topic], payload: Value) {
    for topic in topics {
        if let Err(e) = sink.notify(*topic, payload.clone()) {
            tracing::warn!(topic = %topic, "{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Broken;

    impl InvalidationSink for Broken {
        fn notify(&self, _: Topic, _: Value) -> Result<(), NotifyError> {
            Err(NotifyError("down".into()))
        }
    }

    #[test]
    fn failing_sink_is_swallowed() {
        signal(&Broken, &[Topic::Catalog, Topic::Listing(3)], json!({}));
    }

    #[test]
    fn recorder_keeps_order() {
        let sink = RecordingSink::default();
        signal(&sink, &[Topic::PendingListings, Topic::Listing(4)], json!({"id": 4}));
        assert_eq!(sink.topics(), vec![Topic::PendingListings, Topic::Listing(4)]);
        assert_eq!(Topic::Listing(4).to_string(), "listing:4");
    }
}
