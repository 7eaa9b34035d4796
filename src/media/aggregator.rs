//! Debounces album uploads: N photo events sharing a media-group id become one decision.
//!
//! The first event for a `(user, group)` key becomes the collector and waits out the
//! window; every later event appends and returns at once. Closed batches stay as
//! tombstones for the retention period so stragglers are recognised as late.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use teloxide::types::MessageId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type BatchKey = (i64, String);

#[derive(Debug)]
struct Batch {
    collected: Vec<MessageId>,
    closed: bool,
    opened_at: Instant,
    closed_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// This call was the collector; the full batch in arrival order.
    Collector(Vec<MessageId>),
    /// Appended to an open batch owned by another call.
    Joined,
    /// The batch was already resolved when this event arrived.
    Late,
}

pub struct MediaGroupAggregator {
    window: Duration,
    retention: Duration,
    batches: Mutex<HashMap<BatchKey, Batch>>,
}

impl MediaGroupAggregator {
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            window,
            retention,
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Only the collector call receives the batch, exactly once.
    pub async fn observe(&self, user_id: i64, group_id: &str, event_id: MessageId) -> Observed {
        let key: BatchKey = (user_id, group_id.to_string());

        // Collector role is decided and recorded before the first suspension point.
        let joined = {
            let mut batches = self.batches.lock();
            let now = Instant::now();
            self.evict_expired(&mut batches, now);
            match batches.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let batch = entry.get_mut();
                    if batch.closed {
                        Some(Observed::Late)
                    } else {
                        batch.collected.push(event_id);
                        Some(Observed::Joined)
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(Batch {
                        collected: vec![event_id],
                        closed: false,
                        opened_at: now,
                        closed_at: None,
                    });
                    None
                }
            }
        };

        if let Some(observed) = joined {
            if observed == Observed::Late {
                info!(
                    user_id,
                    group_id,
                    message_id = event_id.0,
                    "Media group member arrived after the batch closed"
                );
            } else {
                debug!(user_id, group_id, message_id = event_id.0, "Joined media group batch");
            }
            return observed;
        }

        tokio::time::sleep(self.window).await;

        let mut batches = self.batches.lock();
        match batches.get_mut(&key) {
            Some(batch) => {
                batch.closed = true;
                batch.closed_at = Some(Instant::now());
                let collected = std::mem::take(&mut batch.collected);
                debug!(user_id, group_id, size = collected.len(), "Media group batch closed");
                Observed::Collector(collected)
            }
            None => {
                warn!(user_id, group_id, "Media group batch vanished before closing");
                Observed::Collector(vec![event_id])
            }
        }
    }

    #[cfg(test)]
    fn pending_batches(&self) -> usize {
        self.batches.lock().len()
    }

    fn evict_expired(&self, batches: &mut HashMap<BatchKey, Batch>, now: Instant) {
        let window = self.window;
        let retention = self.retention;
        batches.retain(|_, batch| match batch.closed_at {
            Some(closed_at) => now.duration_since(closed_at) < retention,
            // An open batch past window + retention lost its collector.
            None => now.duration_since(batch.opened_at) < window + retention,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoDecision {
    Accept(MessageId),
    RejectAlbum(Vec<MessageId>),
}

impl PhotoDecision {
    /// One reference photo per step: any batch with more than one member is rejected whole.
    pub fn from_batch(batch: Vec<MessageId>) -> Option<Self> {
        match batch.as_slice() {
            [] => None,
            [single] => Some(PhotoDecision::Accept(*single)),
            _ => Some(PhotoDecision::RejectAlbum(batch)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn aggregator() -> Arc<MediaGroupAggregator> {
        Arc::new(MediaGroupAggregator::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
        ))
    }

    fn ids(values: &[i32]) -> Vec<MessageId> {
        values.iter().copied().map(MessageId).collect()
    }

    async fn batch_of(
        agg: &MediaGroupAggregator,
        user_id: i64,
        group_id: &str,
        event_id: i32,
    ) -> Option<Vec<MessageId>> {
        match agg.observe(user_id, group_id, MessageId(event_id)).await {
            Observed::Collector(ids) => Some(ids),
            Observed::Joined | Observed::Late => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn album_resolves_once_in_arrival_order() {
        let agg = aggregator();
        let collector = tokio::spawn({
            let agg = agg.clone();
            async move { batch_of(&agg, 42, "g1", 5001).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(batch_of(&agg, 42, "g1", 5002).await, None);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(batch_of(&agg, 42, "g1", 5003).await, None);

        let batch = collector.await.unwrap().unwrap();
        assert_eq!(batch, ids(&[5001, 5002, 5003]));
        assert_eq!(
            PhotoDecision::from_batch(batch),
            Some(PhotoDecision::RejectAlbum(ids(&[5001, 5002, 5003])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_first_events_elect_one_collector() {
        let agg = aggregator();
        let (a, b, c) = tokio::join!(
            batch_of(&agg, 7, "g", 1),
            batch_of(&agg, 7, "g", 2),
            batch_of(&agg, 7, "g", 3),
        );

        let results = [a, b, c];
        let collected: Vec<_> = results.iter().flatten().collect();
        assert_eq!(collected, vec![&ids(&[1, 2, 3])]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_member_group_is_accepted() {
        let agg = aggregator();
        let batch = batch_of(&agg, 1, "solo", 10).await.unwrap();
        assert_eq!(
            PhotoDecision::from_batch(batch),
            Some(PhotoDecision::Accept(MessageId(10)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn straggler_after_close_is_late() {
        let agg = aggregator();
        batch_of(&agg, 1, "g", 10).await.unwrap();

        let observed = agg.observe(1, "g", MessageId(11)).await;

        assert_eq!(observed, Observed::Late);
    }

    #[tokio::test(start_paused = true)]
    async fn users_sharing_a_group_id_get_separate_batches() {
        let agg = aggregator();
        let (a, b) = tokio::join!(
            batch_of(&agg, 1, "g", 10),
            batch_of(&agg, 2, "g", 20),
        );
        assert_eq!(a, Some(ids(&[10])));
        assert_eq!(b, Some(ids(&[20])));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_batches_are_evicted_after_retention() {
        let agg = aggregator();
        batch_of(&agg, 1, "g", 10).await.unwrap();
        assert_eq!(agg.pending_batches(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;

        let reopened = batch_of(&agg, 1, "other", 12).await;
        assert_eq!(reopened, Some(ids(&[12])));
        assert_eq!(agg.pending_batches(), 1);
    }

    #[test]
    fn empty_batch_has_no_decision() {
        assert_eq!(PhotoDecision::from_batch(Vec::new()), None);
    }
}
