use tokio::sync::broadcast;

use crate::models::IndexingStatusEvent;

/// Fixed subject the reference deployment would publish `IndexingStatus`
/// events under when wired to an external transport. Publication to an
/// actual transport (NATS or otherwise) is out of scope here; this crate's
/// responsibility ends at producing the serialized payload.
pub const INDEXING_STATUS_SUBJECT: &str = "indexing_data";

/// Status Broadcaster (component I): serializes `IndexingStatus` events to
/// JSON and hands them to whatever is subscribed. Publication is always
/// best-effort — a broadcaster failure never aborts the orchestrator.
pub struct StatusBroadcaster {
    sender: broadcast::Sender<String>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Serializes `event` and publishes it. Serialization failure and "no
    /// subscribers" both degrade to a warning log, never a propagated error.
    pub fn publish(&self, event: &IndexingStatusEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(error = %error, "failed to serialize indexing status event, dropping");
                return;
            }
        };

        if self.sender.send(payload).is_err() {
            tracing::warn!(subject = INDEXING_STATUS_SUBJECT, "status broadcaster has no subscribers, dropping event");
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexingPhase;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let broadcaster = StatusBroadcaster::default();
        broadcaster.publish(&IndexingStatusEvent::not_started());
    }

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let broadcaster = StatusBroadcaster::default();
        let mut receiver = broadcaster.subscribe();

        broadcaster.publish(&IndexingStatusEvent::not_started());

        let payload = receiver.recv().await.unwrap();
        assert!(payload.contains("not_started"));
    }

    #[tokio::test]
    async fn failed_event_serializes_with_error_message() {
        let broadcaster = StatusBroadcaster::default();
        let mut receiver = broadcaster.subscribe();

        broadcaster.publish(&IndexingStatusEvent::failed("boom", vec![]));

        let payload = receiver.recv().await.unwrap();
        assert!(payload.contains("failed"));
        assert!(payload.contains("boom"));
        let _: IndexingPhase = IndexingPhase::Failed;
    }
}
