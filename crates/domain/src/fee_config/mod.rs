//! Platform fee configuration.
//!
//! A single fee schedule stream holds the active terms. Every revision is an
//! event on that stream, so bookings priced earlier can always be traced to
//! the terms they were priced with.

mod aggregate;
mod config;
mod provider;

pub use aggregate::{
    FeeConfigActivatedData, FeeConfigUpdatedData, FeeSchedule, FeeScheduleEvent,
    fee_schedule_id,
};
pub use config::{FeeConfig, FeeConfigChanges, FeeDefaults};
pub use provider::FeeConfigProvider;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum FeeConfigError {
    #[error("Invalid fee configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("No fee configuration has been activated")]
    NotInitialized,

    #[error("Fee configuration is already active")]
    AlreadyInitialized,
}

impl FeeConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        FeeConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FeeConfigError::Invalid { .. } => ErrorKind::Validation,
            FeeConfigError::NotInitialized => ErrorKind::Internal,
            FeeConfigError::AlreadyInitialized => ErrorKind::Conflict,
        }
    }
}
