//! Projection processor for feeding events to projections.

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Feeds stored events to the registered projections.
///
/// Catch-ups are serialized; two callers never deliver the same event twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Walks the whole log and hands each projection the events past its
    /// position.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let _guard = self.catch_up.lock().await;
        let mut stream = self.store.stream_all_events().await?;
        let mut log_index: u64 = 0;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            log_index += 1;

            for projection in &self.projections {
                if !projection.position().await.is_behind(log_index) {
                    continue;
                }
                projection.handle(&event).await?;
                if projection.follows(&event) {
                    delivered += 1;
                    metrics::counter!("projections_events_processed", "projection" => projection.name())
                        .increment(1);
                }
            }
        }

        for projection in &self.projections {
            let position = projection.position().await;
            metrics::gauge!("projection_events_seen", "projection" => projection.name())
                .set(position.events_seen as f64);
        }

        if delivered > 0 {
            tracing::info!(events = log_index, delivered, "catch-up complete");
        } else {
            tracing::debug!(events = log_index, "projections already current");
        }

        Ok(())
    }

    /// Hands one freshly appended event to every projection.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Clears every read model and replays the log.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            tracing::info!(
                projection = projection.name(),
                position = %projection.position().await,
                "rebuilding"
            );
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionPosition;
    use async_trait::async_trait;
    use common::AggregateId;
    use event_store::{AppendOptions, InMemoryEventStore, Version};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Counts booking events; other streams only move its position.
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
        position: Arc<RwLock<ProjectionPosition>>,
    }

    impl CountingProjection {
        fn new() -> Self {
            Self {
                count: Arc::new(RwLock::new(0)),
                position: Arc::new(RwLock::new(ProjectionPosition::zero())),
            }
        }
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "CountingProjection"
        }

        fn streams(&self) -> &'static [&'static str] {
            &["Booking"]
        }

        async fn handle(&self, event: &EventEnvelope) -> Result<()> {
            if self.follows(event) {
                *self.count.write().await += 1;
            }
            let mut pos = self.position.write().await;
            *pos = pos.after(event);
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            *self.position.read().await
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            *self.position.write().await = ProjectionPosition::zero();
            Ok(())
        }
    }

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Booking")
            .event_type("TestEvent")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    async fn store_with(count: i64) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        if count > 0 {
            let id = AggregateId::new();
            let events = (1..=count).map(|v| event(id, v)).collect();
            store.append(events, AppendOptions::new()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn catch_up_processes_all_events() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(store_with(3).await);
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();

        assert_eq!(*count.read().await, 3);
    }

    #[tokio::test]
    async fn process_single_event() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection));

        processor
            .process_event(&event(AggregateId::new(), 1))
            .await
            .unwrap();

        assert_eq!(*count.read().await, 1);
    }

    #[tokio::test]
    async fn rebuild_resets_and_replays() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let position = Arc::clone(&projection.position);
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();
        processor.rebuild_all().await.unwrap();

        assert_eq!(*count.read().await, 2);
        assert_eq!(position.read().await.events_seen, 2);
    }

    #[tokio::test]
    async fn catch_up_skips_already_processed() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(store_with(3).await);
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();
        processor.run_catch_up().await.unwrap();

        assert_eq!(*count.read().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_catch_ups_deliver_once() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(store_with(5).await);
        processor.register(Box::new(projection));
        let processor = Arc::new(processor);

        let a = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run_catch_up().await }
        });
        let b = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run_catch_up().await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(*count.read().await, 5);
    }

    #[tokio::test]
    async fn empty_store_catch_up() {
        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();

        assert_eq!(*count.read().await, 0);
        assert_eq!(processor.projection_count(), 1);
    }

    #[tokio::test]
    async fn multiple_projections() {
        let first = CountingProjection::new();
        let second = CountingProjection::new();
        let count1 = Arc::clone(&first.count);
        let count2 = Arc::clone(&second.count);
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(first));
        processor.register(Box::new(second));

        processor.run_catch_up().await.unwrap();

        assert_eq!(*count1.read().await, 2);
        assert_eq!(*count2.read().await, 2);
    }

    #[tokio::test]
    async fn calendar_streams_move_position_without_counting() {
        let store = store_with(2).await;
        let calendar = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("AccommodationCalendar")
            .event_type("NightsHeld")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();
        store
            .append(vec![calendar], AppendOptions::new())
            .await
            .unwrap();

        let projection = CountingProjection::new();
        let count = Arc::clone(&projection.count);
        let position = Arc::clone(&projection.position);
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(projection));

        processor.run_catch_up().await.unwrap();

        assert_eq!(*count.read().await, 2);
        assert_eq!(position.read().await.events_seen, 3);
    }
}
