//! Bucket and object event notification for OpenEndpoint.
//!
//! Subscribers register `(bucket, pattern)` pairs against S3-style event
//! names (`s3:ObjectCreated:Put`, `s3:ObjectRemoved:DeleteMarkerCreated`,
//! ...); patterns support a trailing `*` wildcard. Delivery is best-effort
//! and never blocks the producer: a subscriber whose buffered channel is
//! full simply misses the event, and the miss is counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A published storage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// The S3-style event name (e.g. `s3:ObjectCreated:Put`).
    pub name: String,
    /// The bucket the event happened in.
    pub bucket: String,
    /// The object key, when the event concerns an object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The version ID, when the event concerns a version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Object size in bytes, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl StorageEvent {
    /// Build an object-scoped event.
    #[must_use]
    pub fn object(
        name: &str,
        bucket: &str,
        key: &str,
        version_id: Option<String>,
        size: Option<u64>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            bucket: bucket.to_owned(),
            key: Some(key.to_owned()),
            version_id,
            size,
            occurred_at: Utc::now(),
        }
    }

    /// Build a bucket-scoped event.
    #[must_use]
    pub fn bucket(name: &str, bucket: &str) -> Self {
        Self {
            name: name.to_owned(),
            bucket: bucket.to_owned(),
            key: None,
            version_id: None,
            size: None,
            occurred_at: Utc::now(),
        }
    }
}

/// One registered subscriber.
struct Subscriber {
    pattern: String,
    sender: mpsc::Sender<StorageEvent>,
    dropped: AtomicU64,
}

/// Handle returned from [`EventNotifier::subscribe`], used to unsubscribe
/// and to inspect the drop counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The event notifier.
///
/// Subscribers are advisory: delivery never applies backpressure to the
/// storage pipeline.
#[derive(Default)]
pub struct EventNotifier {
    subscribers: DashMap<String, Vec<(SubscriptionId, Arc<Subscriber>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("buckets", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl EventNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for events in `bucket` whose names match
    /// `pattern`. Returns the subscription handle and the receiving end of
    /// a channel buffering up to `capacity` undelivered events.
    pub fn subscribe(
        &self,
        bucket: &str,
        pattern: &str,
        capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<StorageEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            pattern: pattern.to_owned(),
            sender,
            dropped: AtomicU64::new(0),
        });
        debug!(bucket, pattern, id = id.0, "subscriber registered");
        self.subscribers
            .entry(bucket.to_owned())
            .or_default()
            .push((id, subscriber));
        (id, receiver)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, bucket: &str, id: SubscriptionId) -> bool {
        let Some(mut list) = self.subscribers.get_mut(bucket) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        before != list.len()
    }

    /// Publish an event to every matching subscriber of its bucket.
    ///
    /// Returns the number of subscribers the event was delivered to.
    /// Full channels drop the event for that subscriber and bump its
    /// counter; the producer never waits.
    pub fn publish(&self, event: &StorageEvent) -> usize {
        let Some(list) = self.subscribers.get(&event.bucket) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, subscriber) in list.iter() {
            if !pattern_matches(&subscriber.pattern, &event.name) {
                continue;
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = subscriber.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(
                        bucket = %event.bucket,
                        event = %event.name,
                        subscription = id.0,
                        dropped_total = total,
                        "subscriber channel full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver gone; the entry is pruned lazily on the next
                    // unsubscribe or ignored forever.
                    trace!(subscription = id.0, "subscriber channel closed");
                }
            }
        }
        delivered
    }

    /// Events dropped for one subscription because its channel was full.
    #[must_use]
    pub fn dropped_count(&self, bucket: &str, id: SubscriptionId) -> u64 {
        self.subscribers
            .get(bucket)
            .and_then(|list| {
                list.iter()
                    .find(|(sid, _)| *sid == id)
                    .map(|(_, s)| s.dropped.load(Ordering::Relaxed))
            })
            .unwrap_or(0)
    }
}

/// Event-name matching: exact, or a trailing-`*` prefix wildcard.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}
