//! Command handling: load, decide, append with optimistic concurrency.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, StreamAppend, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Outcome of a command that went through the store.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate with the new events applied.
    pub aggregate: A,

    /// Events recorded by the command. Empty when the command was a no-op.
    pub events: Vec<A::Event>,

    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Events decided against a loaded aggregate but not yet appended.
///
/// Several staged commands can be committed in one transaction with
/// [`commit_staged`]; each append still carries the version the aggregate
/// was read at, so a concurrent writer fails the whole transaction.
#[derive(Debug)]
pub struct Staged<A: Aggregate> {
    aggregate: A,
    events: Vec<A::Event>,
    append: Option<StreamAppend>,
}

impl<A: Aggregate> Staged<A> {
    /// Removes the pending append so it can be handed to the store.
    pub fn take_append(&mut self) -> Option<StreamAppend> {
        self.append.take()
    }

    pub fn events(&self) -> &[A::Event] {
        &self.events
    }

    /// Applies the staged events once the store has accepted them.
    pub fn finish(self, new_version: Option<Version>) -> CommandResult<A> {
        let mut aggregate = self.aggregate;
        let new_version = new_version.unwrap_or_else(|| aggregate.version());
        aggregate.apply_events(self.events.iter().cloned());
        aggregate.set_version(new_version);
        CommandResult {
            aggregate,
            events: self.events,
            new_version,
        }
    }
}

/// Commits the appends of several staged commands atomically.
///
/// Returns the new version per input slot; `None` for slots that had
/// nothing to append.
pub async fn commit_staged<S: EventStore + ?Sized>(
    store: &S,
    appends: Vec<Option<StreamAppend>>,
) -> Result<Vec<Option<Version>>, DomainError> {
    let mut slots = Vec::with_capacity(appends.len());
    let mut batch = Vec::new();
    for append in appends {
        match append {
            Some(append) => {
                slots.push(Some(batch.len()));
                batch.push(append);
            }
            None => slots.push(None),
        }
    }

    if batch.is_empty() {
        return Ok(vec![None; slots.len()]);
    }

    let versions = store.append_atomic(batch).await?;
    Ok(slots
        .into_iter()
        .map(|slot| slot.and_then(|i| versions.get(i).copied()))
        .collect())
}

/// Loads aggregates of one type and persists the events their commands produce.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replays a stream. Returns a default aggregate for an empty stream.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let envelopes = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in envelopes {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Replays a stream, `None` if it has never been written.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Loads, runs `command_fn` against the fresh state, and appends the
    /// resulting events expecting the version that was read.
    pub async fn execute<F, E>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, E>,
        DomainError: From<E>,
    {
        let aggregate = self.load(aggregate_id).await?;
        let events = command_fn(&aggregate)?;
        let mut staged = self.stage(aggregate_id, aggregate, events)?;

        let new_version = match staged.take_append() {
            Some(append) => Some(self.store.append(append.events, append.options).await?),
            None => None,
        };

        Ok(staged.finish(new_version))
    }

    /// Wraps decided events into envelopes without writing them.
    pub fn stage(
        &self,
        aggregate_id: AggregateId,
        aggregate: A,
        events: Vec<A::Event>,
    ) -> Result<Staged<A>, DomainError> {
        let append = if events.is_empty() {
            None
        } else {
            let current = aggregate.version();
            let envelopes = self.build_envelopes(aggregate_id, current, &events)?;
            Some(StreamAppend::new(envelopes, AppendOptions::at(current)))
        };

        Ok(Staged {
            aggregate,
            events,
            append,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

impl<S, A> Clone for CommandHandler<S, A>
where
    S: EventStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}
