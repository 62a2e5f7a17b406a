use crate::catalog::{AccommodationSnapshot, CalendarOverride};
use crate::fee_config::FeeConfig;
use crate::money::{Money, MoneyError};
use crate::stay::{DateRange, GuestCount};

use super::{CancellationPolicyTier, PriceBreakdown, PricingError, RefundPolicyTable};

/// Computes stay prices and cancellation refunds.
///
/// Pure: the fee configuration and calendar overrides are passed in by the
/// caller, so one request prices against one consistent set of inputs.
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    refunds: RefundPolicyTable,
}

impl PricingEngine {
    pub fn new(refunds: RefundPolicyTable) -> Self {
        Self { refunds }
    }

    /// Prices a stay. Each component is rounded to cents before summing.
    ///
    /// Fee bounds are amounts in the fee configuration's currency and no
    /// conversion is done, so a listing priced in any other currency fails
    /// with [`MoneyError::CurrencyMismatch`] and cannot be booked until the
    /// active fee configuration uses its currency.
    pub fn price(
        &self,
        accommodation: &AccommodationSnapshot,
        range: &DateRange,
        guests: &GuestCount,
        fees: &FeeConfig,
        overrides: &[CalendarOverride],
    ) -> Result<PriceBreakdown, PricingError> {
        let nights = range.nights();
        if nights == 0 {
            return Err(PricingError::NoNights);
        }
        if guests.total() == 0 {
            return Err(PricingError::NoGuests);
        }

        let base = accommodation.nightly_price.rounded();
        if base.currency() != fees.currency() {
            return Err(MoneyError::CurrencyMismatch {
                expected: fees.currency(),
                found: base.currency(),
            }
            .into());
        }

        let mut total_base_price = Money::zero(base.currency());
        for night in range.each_night() {
            let nightly = overrides
                .iter()
                .find(|o| o.date == night)
                .and_then(|o| o.price_override)
                .map(|p| p.rounded())
                .unwrap_or(base);
            total_base_price = total_base_price.try_add(&nightly)?;
        }

        let service_fee = total_base_price
            .percent(fees.service_fee_percentage)
            .clamp(&fees.service_fee_min, &fees.service_fee_max)?;
        let cleaning_fee = total_base_price.percent(fees.cleaning_fee_percentage);
        let tax_amount = total_base_price.try_add(&service_fee)?.scale(fees.tax_rate);
        let discount_amount = Money::zero(base.currency());

        let total_price = total_base_price
            .try_add(&service_fee)?
            .try_add(&cleaning_fee)?
            .try_add(&tax_amount)?
            .try_sub(&discount_amount)?;

        Ok(PriceBreakdown {
            nights,
            base_price_per_night: base,
            total_base_price,
            service_fee,
            cleaning_fee,
            tax_amount,
            discount_amount,
            total_price,
        })
    }

    /// Refund owed when cancelling `days_before_check_in` days ahead.
    pub fn refund(
        &self,
        total_price: &Money,
        tier: CancellationPolicyTier,
        days_before_check_in: i64,
    ) -> Money {
        let percentage = self.refunds.percentage_for(tier, days_before_check_in);
        if percentage.is_zero() {
            return Money::zero(total_price.currency());
        }
        total_price.percent(percentage)
    }
}
