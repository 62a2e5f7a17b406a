use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

use super::{FeeConfig, FeeConfigChanges, FeeConfigError, FeeDefaults};

const FEE_SCHEDULE_STREAM: Uuid = Uuid::from_u128(0x6665_6573_6368_6564_756c_6500_0000_0001);

/// Stream holding the platform's fee schedule. There is exactly one.
pub fn fee_schedule_id() -> AggregateId {
    AggregateId::from_uuid(FEE_SCHEDULE_STREAM)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeeScheduleEvent {
    /// The first configuration was put in force.
    FeeConfigActivated(FeeConfigActivatedData),

    /// An administrator replaced the active terms.
    FeeConfigUpdated(FeeConfigUpdatedData),
}

impl DomainEvent for FeeScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FeeScheduleEvent::FeeConfigActivated(_) => "FeeConfigActivated",
            FeeScheduleEvent::FeeConfigUpdated(_) => "FeeConfigUpdated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfigActivatedData {
    pub config: FeeConfig,

    /// `None` when the defaults were activated on first use.
    pub activated_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfigUpdatedData {
    pub previous: FeeConfig,
    pub current: FeeConfig,
    pub updated_by: UserId,
}

/// History of fee configurations; the last one is active.
#[derive(Debug, Default)]
pub struct FeeSchedule {
    id: Option<AggregateId>,
    active: Option<FeeConfig>,
    revisions: u64,
    version: Version,
}

impl Aggregate for FeeSchedule {
    type Event = FeeScheduleEvent;
    type Error = FeeConfigError;

    fn aggregate_type() -> &'static str {
        "FeeSchedule"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            FeeScheduleEvent::FeeConfigActivated(data) => {
                self.id = Some(fee_schedule_id());
                self.active = Some(data.config);
            }
            FeeScheduleEvent::FeeConfigUpdated(data) => {
                self.active = Some(data.current);
            }
        }
        self.revisions += 1;
    }
}

impl FeeSchedule {
    pub fn active(&self) -> Option<&FeeConfig> {
        self.active.as_ref()
    }

    /// Number of configurations ever put in force.
    pub fn revisions(&self) -> u64 {
        self.revisions
    }

    // Commands

    pub fn activate(
        &self,
        defaults: &FeeDefaults,
        activated_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeeScheduleEvent>, FeeConfigError> {
        if self.active.is_some() {
            return Err(FeeConfigError::AlreadyInitialized);
        }

        let config = defaults.to_config(now);
        config.validate()?;

        Ok(vec![FeeScheduleEvent::FeeConfigActivated(
            FeeConfigActivatedData {
                config,
                activated_by,
            },
        )])
    }

    /// Replaces the active terms. Changes that leave the terms as they are
    /// record nothing.
    pub fn update(
        &self,
        admin_id: UserId,
        changes: &FeeConfigChanges,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeeScheduleEvent>, FeeConfigError> {
        let previous = self.active.as_ref().ok_or(FeeConfigError::NotInitialized)?;

        let current = changes.apply_to(previous, now);
        current.validate()?;
        if current.currency() != previous.currency() {
            return Err(FeeConfigError::invalid(
                "service_fee_min",
                format!(
                    "currency {} differs from active currency {}",
                    current.currency(),
                    previous.currency()
                ),
            ));
        }

        if current.same_terms(previous) {
            return Ok(vec![]);
        }

        Ok(vec![FeeScheduleEvent::FeeConfigUpdated(FeeConfigUpdatedData {
            previous: previous.clone(),
            current,
            updated_by: admin_id,
        })])
    }
}
