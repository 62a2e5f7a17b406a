use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{EventStore, EventStream, StreamAppend, validate_atomic_append},
};

#[derive(Default)]
struct Inner {
    /// Every event in insertion order.
    log: Vec<EventEnvelope>,
    /// Positions in `log` per stream.
    streams: HashMap<AggregateId, Vec<usize>>,
}

impl Inner {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.streams
            .get(&aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&pos| self.log[pos].version)
            .unwrap_or_else(Version::initial)
    }
}

/// Event store kept in process memory.
///
/// A single write lock covers a whole transaction, which makes
/// [`EventStore::append_atomic`] all-or-nothing across streams.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, appends), fields(streams = appends.len()))]
    async fn append_atomic(&self, appends: Vec<StreamAppend>) -> Result<Vec<Version>> {
        validate_atomic_append(&appends)?;

        let mut inner = self.inner.write().await;

        // Check every stream before writing any of them.
        for append in &appends {
            let first = &append.events[0];
            let current = inner.version_of(first.aggregate_id);

            if let Some(expected) = append.options.expected_version
                && current != expected
            {
                metrics::counter!("event_store_conflicts_total").increment(1);
                tracing::debug!(
                    aggregate_id = %first.aggregate_id,
                    %expected,
                    actual = %current,
                    "stream moved, append refused"
                );
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: first.aggregate_id,
                    expected,
                    actual: current,
                });
            }

            if first.version != current.next() {
                metrics::counter!("event_store_conflicts_total").increment(1);
                tracing::debug!(
                    aggregate_id = %first.aggregate_id,
                    version = %first.version,
                    actual = %current,
                    "event version does not follow the stream"
                );
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: first.aggregate_id,
                    expected: first.version,
                    actual: current,
                });
            }
        }

        let mut versions = Vec::with_capacity(appends.len());
        for append in appends {
            let mut last = Version::initial();
            for event in append.events {
                last = event.version;
                let position = inner.log.len();
                inner
                    .streams
                    .entry(event.aggregate_id)
                    .or_default()
                    .push(position);
                inner.log.push(event);
            }
            versions.push(last);
        }

        metrics::counter!("event_store_commits_total").increment(1);
        tracing::trace!(log_len = inner.log.len(), "append committed");
        Ok(versions)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|positions| positions.iter().map(|&p| inner.log[p].clone()).collect())
            .unwrap_or_default())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.inner.read().await.log.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .contains_key(&aggregate_id)
            .then(|| inner.version_of(aggregate_id)))
    }
}
