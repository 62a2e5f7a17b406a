use serde::{Deserialize, Serialize};

use crate::money::{Currency, Money, MoneyError};

/// Resolved price of a stay, frozen on the booking at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub nights: u32,
    pub base_price_per_night: Money,
    pub total_base_price: Money,
    pub service_fee: Money,
    pub cleaning_fee: Money,
    pub tax_amount: Money,
    pub discount_amount: Money,
    pub total_price: Money,
}

impl PriceBreakdown {
    pub fn currency(&self) -> Currency {
        self.total_price.currency()
    }

    /// `total_base_price + service_fee + cleaning_fee + tax_amount - discount_amount`.
    pub fn components_total(&self) -> Result<Money, MoneyError> {
        self.total_base_price
            .try_add(&self.service_fee)?
            .try_add(&self.cleaning_fee)?
            .try_add(&self.tax_amount)?
            .try_sub(&self.discount_amount)
    }

    /// True when the stored total equals the sum of its components.
    pub fn is_consistent(&self) -> bool {
        self.components_total()
            .is_ok_and(|total| total == self.total_price)
    }

    /// What the supplier receives on a split payment: the total minus the
    /// platform's application fee (the service fee).
    pub fn supplier_share(&self) -> Result<Money, MoneyError> {
        self.total_price.try_sub(&self.service_fee)
    }
}
