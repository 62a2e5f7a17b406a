use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::money::{Currency, Money};

use super::FeeConfigError;

/// The active fee and tax terms applied when pricing a new booking.
///
/// Percentages are expressed in percent (`10` is 10%); `tax_rate` is a
/// fraction (`0.08` is 8%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Increments with every accepted update.
    pub revision: u64,
    pub service_fee_percentage: Decimal,
    pub service_fee_min: Money,
    pub service_fee_max: Money,
    pub cleaning_fee_percentage: Decimal,
    pub tax_rate: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeConfig {
    pub fn currency(&self) -> Currency {
        self.service_fee_min.currency()
    }

    pub fn validate(&self) -> Result<(), FeeConfigError> {
        check_percentage("service_fee_percentage", self.service_fee_percentage)?;
        check_percentage("cleaning_fee_percentage", self.cleaning_fee_percentage)?;

        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE {
            return Err(FeeConfigError::invalid(
                "tax_rate",
                format!("{} is outside 0..=1", self.tax_rate),
            ));
        }
        if self.service_fee_min.is_negative() {
            return Err(FeeConfigError::invalid("service_fee_min", "must not be negative"));
        }
        if self.service_fee_max.is_negative() {
            return Err(FeeConfigError::invalid("service_fee_max", "must not be negative"));
        }
        match self.service_fee_min.try_cmp(&self.service_fee_max) {
            Ok(std::cmp::Ordering::Greater) => Err(FeeConfigError::invalid(
                "service_fee_min",
                format!(
                    "{} exceeds service_fee_max {}",
                    self.service_fee_min, self.service_fee_max
                ),
            )),
            Ok(_) => Ok(()),
            Err(e) => Err(FeeConfigError::invalid("service_fee_max", e.to_string())),
        }
    }

    /// True when both configs charge the same terms, ignoring bookkeeping fields.
    pub fn same_terms(&self, other: &FeeConfig) -> bool {
        self.service_fee_percentage == other.service_fee_percentage
            && self.service_fee_min == other.service_fee_min
            && self.service_fee_max == other.service_fee_max
            && self.cleaning_fee_percentage == other.cleaning_fee_percentage
            && self.tax_rate == other.tax_rate
    }
}

fn check_percentage(field: &'static str, value: Decimal) -> Result<(), FeeConfigError> {
    if value < Decimal::ZERO || value > dec!(100) {
        return Err(FeeConfigError::invalid(
            field,
            format!("{value} is outside 0..=100"),
        ));
    }
    Ok(())
}

/// A partial update: only the fields set here change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeConfigChanges {
    pub service_fee_percentage: Option<Decimal>,
    pub service_fee_min: Option<Money>,
    pub service_fee_max: Option<Money>,
    pub cleaning_fee_percentage: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
}

impl FeeConfigChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_fee_percentage(mut self, value: Decimal) -> Self {
        self.service_fee_percentage = Some(value);
        self
    }

    pub fn service_fee_bounds(mut self, min: Money, max: Money) -> Self {
        self.service_fee_min = Some(min);
        self.service_fee_max = Some(max);
        self
    }

    pub fn cleaning_fee_percentage(mut self, value: Decimal) -> Self {
        self.cleaning_fee_percentage = Some(value);
        self
    }

    pub fn tax_rate(mut self, value: Decimal) -> Self {
        self.tax_rate = Some(value);
        self
    }

    /// The config that results from applying these changes to `current`.
    pub fn apply_to(&self, current: &FeeConfig, now: DateTime<Utc>) -> FeeConfig {
        FeeConfig {
            revision: current.revision + 1,
            service_fee_percentage: self
                .service_fee_percentage
                .unwrap_or(current.service_fee_percentage),
            service_fee_min: self.service_fee_min.unwrap_or(current.service_fee_min),
            service_fee_max: self.service_fee_max.unwrap_or(current.service_fee_max),
            cleaning_fee_percentage: self
                .cleaning_fee_percentage
                .unwrap_or(current.cleaning_fee_percentage),
            tax_rate: self.tax_rate.unwrap_or(current.tax_rate),
            active: true,
            created_at: current.created_at,
            updated_at: now,
        }
    }
}

/// Terms used when no configuration has been activated yet.
///
/// Reads from environment variables:
/// - `FEE_SERVICE_PERCENTAGE` (default `10`)
/// - `FEE_SERVICE_MIN` (default `5.00`)
/// - `FEE_SERVICE_MAX` (default `100.00`)
/// - `FEE_CLEANING_PERCENTAGE` (default `10`)
/// - `FEE_TAX_RATE` (default `0.08`)
/// - `FEE_CURRENCY` (default `USD`)
#[derive(Debug, Clone, PartialEq)]
pub struct FeeDefaults {
    pub service_fee_percentage: Decimal,
    pub service_fee_min: Decimal,
    pub service_fee_max: Decimal,
    pub cleaning_fee_percentage: Decimal,
    pub tax_rate: Decimal,
    pub currency: Currency,
}

impl FeeDefaults {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_fee_percentage: env_decimal(
                "FEE_SERVICE_PERCENTAGE",
                defaults.service_fee_percentage,
            ),
            service_fee_min: env_decimal("FEE_SERVICE_MIN", defaults.service_fee_min),
            service_fee_max: env_decimal("FEE_SERVICE_MAX", defaults.service_fee_max),
            cleaning_fee_percentage: env_decimal(
                "FEE_CLEANING_PERCENTAGE",
                defaults.cleaning_fee_percentage,
            ),
            tax_rate: env_decimal("FEE_TAX_RATE", defaults.tax_rate),
            currency: std::env::var("FEE_CURRENCY")
                .ok()
                .and_then(|raw| match Currency::new(&raw) {
                    Ok(currency) => Some(currency),
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring FEE_CURRENCY");
                        None
                    }
                })
                .unwrap_or(defaults.currency),
        }
    }

    /// The first config built from these defaults.
    pub fn to_config(&self, now: DateTime<Utc>) -> FeeConfig {
        FeeConfig {
            revision: 1,
            service_fee_percentage: self.service_fee_percentage,
            service_fee_min: Money::new(self.service_fee_min, self.currency),
            service_fee_max: Money::new(self.service_fee_max, self.currency),
            cleaning_fee_percentage: self.cleaning_fee_percentage,
            tax_rate: self.tax_rate,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for FeeDefaults {
    fn default() -> Self {
        Self {
            service_fee_percentage: dec!(10),
            service_fee_min: dec!(5.00),
            service_fee_max: dec!(100.00),
            cleaning_fee_percentage: dec!(10),
            tax_rate: dec!(0.08),
            currency: Currency::USD,
        }
    }
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    match std::env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim()).unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "unparsable fee default, using built-in value");
            default
        }),
        Err(_) => default,
    }
}
