use std::sync::Arc;

use chrono::Utc;
use common::UserId;
use event_store::EventStore;

use crate::Clock;
use crate::command::CommandHandler;
use crate::error::DomainError;

use super::{FeeConfig, FeeConfigChanges, FeeConfigError, FeeDefaults, FeeSchedule, fee_schedule_id};

/// Serves the active fee configuration and applies admin updates.
pub struct FeeConfigProvider<S: EventStore> {
    handler: CommandHandler<S, FeeSchedule>,
    defaults: FeeDefaults,
    clock: Clock,
}

impl<S: EventStore> FeeConfigProvider<S> {
    pub fn new(store: S, defaults: FeeDefaults) -> Self {
        Self {
            handler: CommandHandler::new(store),
            defaults,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn defaults(&self) -> &FeeDefaults {
        &self.defaults
    }

    /// Returns the active configuration, activating the defaults on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_active(&self) -> Result<FeeConfig, DomainError> {
        let schedule = self.handler.load(fee_schedule_id()).await?;
        if let Some(active) = schedule.active() {
            return Ok(active.clone());
        }

        let now = (self.clock)();
        let activated = self
            .handler
            .execute(fee_schedule_id(), |schedule| {
                schedule.activate(&self.defaults, None, now)
            })
            .await;

        match activated {
            Ok(result) => {
                tracing::info!(
                    revision = result.aggregate.revisions(),
                    "activated default fee configuration"
                );
                result
                    .aggregate
                    .active()
                    .cloned()
                    .ok_or(DomainError::FeeConfig(FeeConfigError::NotInitialized))
            }
            // Another caller activated first; theirs is the active one.
            Err(e)
                if e.is_concurrency_conflict()
                    || matches!(e, DomainError::FeeConfig(FeeConfigError::AlreadyInitialized)) =>
            {
                self.handler
                    .load(fee_schedule_id())
                    .await?
                    .active()
                    .cloned()
                    .ok_or(DomainError::FeeConfig(FeeConfigError::NotInitialized))
            }
            Err(e) => Err(e),
        }
    }

    /// Applies a partial update and returns the resulting active configuration.
    #[tracing::instrument(skip(self))]
    pub async fn update(
        &self,
        admin_id: UserId,
        changes: FeeConfigChanges,
    ) -> Result<FeeConfig, DomainError> {
        // Make sure there is something to update.
        self.get_active().await?;

        let now = (self.clock)();
        let result = self
            .handler
            .execute(fee_schedule_id(), |schedule| {
                schedule.update(admin_id, &changes, now)
            })
            .await?;

        let active = result
            .aggregate
            .active()
            .cloned()
            .ok_or(DomainError::FeeConfig(FeeConfigError::NotInitialized))?;

        if result.is_noop() {
            tracing::debug!(revision = active.revision, "fee update changed nothing");
        } else {
            tracing::info!(revision = active.revision, %admin_id, "fee configuration updated");
        }

        Ok(active)
    }
}
