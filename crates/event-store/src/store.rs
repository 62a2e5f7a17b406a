use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Version the stream must be at. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// No version check.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }

    /// Picks `expect_new` for an empty stream and `expect_version` otherwise.
    pub fn at(version: Version) -> Self {
        if version == Version::initial() {
            Self::expect_new()
        } else {
            Self::expect_version(version)
        }
    }
}

/// Events for a single stream, part of an atomic multi-stream append.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub events: Vec<EventEnvelope>,
    pub options: AppendOptions,
}

impl StreamAppend {
    pub fn new(events: Vec<EventEnvelope>, options: AppendOptions) -> Self {
        Self { events, options }
    }

    fn aggregate_id(&self) -> Option<AggregateId> {
        self.events.first().map(|e| e.aggregate_id)
    }
}

/// A stream of stored events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Storage for event streams.
///
/// Implementations must be thread-safe and must apply every batch passed to
/// [`EventStore::append_atomic`] entirely or not at all.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends to several streams in one transaction.
    ///
    /// Every stream's expected version is checked before anything is written;
    /// a single mismatch fails the whole batch with `ConcurrencyConflict`.
    /// Returns the new version of each stream, in input order.
    async fn append_atomic(&self, appends: Vec<StreamAppend>) -> Result<Vec<Version>>;

    /// Returns every event of a stream in version order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns every event with the given type, in insertion order.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Streams all stored events in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Current version of a stream, `None` if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Appends events to a single stream.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let versions = self
            .append_atomic(vec![StreamAppend::new(events, options)])
            .await?;
        versions
            .into_iter()
            .next()
            .ok_or_else(|| EventStoreError::InvalidAppend("no version returned".to_string()))
    }
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    async fn append_atomic(&self, appends: Vec<StreamAppend>) -> Result<Vec<Version>> {
        (**self).append_atomic(appends).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_by_type(event_type).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }
}

/// Checks a single-stream batch: non-empty, one stream, gap-free versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events of a batch must target the same stream".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

/// Checks a multi-stream batch: each stream valid and no stream listed twice.
pub fn validate_atomic_append(appends: &[StreamAppend]) -> Result<()> {
    if appends.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot commit an empty transaction".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(appends.len());
    for append in appends {
        validate_events_for_append(&append.events)?;
        if let Some(id) = append.aggregate_id()
            && !seen.insert(id)
        {
            return Err(EventStoreError::InvalidAppend(format!(
                "stream {id} appears twice in one transaction"
            )));
        }
    }

    Ok(())
}
