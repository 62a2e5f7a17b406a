//! Cancellation policy tiers and the lead-time refund table.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::PricingError;

/// Named refund rule set chosen by the supplier for an accommodation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationPolicyTier {
    Flexible,
    Moderate,
    Strict,
    SuperStrict,
}

impl CancellationPolicyTier {
    pub const ALL: [CancellationPolicyTier; 4] = [
        CancellationPolicyTier::Flexible,
        CancellationPolicyTier::Moderate,
        CancellationPolicyTier::Strict,
        CancellationPolicyTier::SuperStrict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicyTier::Flexible => "FLEXIBLE",
            CancellationPolicyTier::Moderate => "MODERATE",
            CancellationPolicyTier::Strict => "STRICT",
            CancellationPolicyTier::SuperStrict => "SUPER_STRICT",
        }
    }
}

impl std::fmt::Display for CancellationPolicyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a tier: cancelling at least `min_days` before check-in
/// refunds `percentage` percent of the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRule {
    pub min_days: i64,
    pub percentage: Decimal,
}

impl RefundRule {
    pub fn new(min_days: i64, percentage: Decimal) -> Self {
        Self {
            min_days,
            percentage,
        }
    }
}

/// Tier → refund steps.
///
/// Lookup picks the highest percentage among the rules whose `min_days` is
/// at most the actual lead time, and falls back to 0% when none apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundPolicyTable {
    tiers: HashMap<CancellationPolicyTier, Vec<RefundRule>>,
}

impl RefundPolicyTable {
    /// A table with no rules: every cancellation refunds nothing.
    pub fn empty() -> Self {
        Self {
            tiers: HashMap::new(),
        }
    }

    /// The platform's published thresholds.
    ///
    /// | Tier | Rules |
    /// |---|---|
    /// | FLEXIBLE | ≥1 day → 100% |
    /// | MODERATE | ≥5 days → 100%, ≥1 day → 50% |
    /// | STRICT | ≥7 days → 50% |
    /// | SUPER_STRICT | ≥14 days → 50% |
    pub fn standard() -> Self {
        let tiers = HashMap::from([
            (
                CancellationPolicyTier::Flexible,
                vec![RefundRule::new(1, dec!(100))],
            ),
            (
                CancellationPolicyTier::Moderate,
                vec![RefundRule::new(5, dec!(100)), RefundRule::new(1, dec!(50))],
            ),
            (
                CancellationPolicyTier::Strict,
                vec![RefundRule::new(7, dec!(50))],
            ),
            (
                CancellationPolicyTier::SuperStrict,
                vec![RefundRule::new(14, dec!(50))],
            ),
        ]);
        Self { tiers }
    }

    /// Replaces the rules of one tier.
    pub fn with_tier(
        mut self,
        tier: CancellationPolicyTier,
        mut rules: Vec<RefundRule>,
    ) -> Result<Self, PricingError> {
        if let Some(rule) = rules
            .iter()
            .find(|r| r.percentage < Decimal::ZERO || r.percentage > dec!(100))
        {
            return Err(PricingError::InvalidRefundRule {
                tier,
                percentage: rule.percentage,
            });
        }
        rules.sort_by(|a, b| b.min_days.cmp(&a.min_days));
        self.tiers.insert(tier, rules);
        Ok(self)
    }

    pub fn rules(&self, tier: CancellationPolicyTier) -> &[RefundRule] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or_default()
    }

    /// Refund percentage for cancelling `days_before_check_in` days ahead.
    pub fn percentage_for(&self, tier: CancellationPolicyTier, days_before_check_in: i64) -> Decimal {
        self.rules(tier)
            .iter()
            .filter(|rule| rule.min_days <= days_before_check_in)
            .map(|rule| rule.percentage)
            .max()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for RefundPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flexible_refunds_fully_until_the_day_before() {
        let table = RefundPolicyTable::standard();
        assert_eq!(table.percentage_for(CancellationPolicyTier::Flexible, 30), dec!(100));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Flexible, 1), dec!(100));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Flexible, 0), Decimal::ZERO);
    }

    #[test]
    fn moderate_steps_down_to_half() {
        let table = RefundPolicyTable::standard();
        assert_eq!(table.percentage_for(CancellationPolicyTier::Moderate, 5), dec!(100));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Moderate, 4), dec!(50));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Moderate, 1), dec!(50));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Moderate, 0), Decimal::ZERO);
    }

    #[test]
    fn strict_tiers_cap_at_half() {
        let table = RefundPolicyTable::standard();
        assert_eq!(table.percentage_for(CancellationPolicyTier::Strict, 7), dec!(50));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Strict, 6), Decimal::ZERO);
        assert_eq!(table.percentage_for(CancellationPolicyTier::SuperStrict, 14), dec!(50));
        assert_eq!(table.percentage_for(CancellationPolicyTier::SuperStrict, 13), Decimal::ZERO);
    }

    #[test]
    fn cancelling_after_check_in_refunds_nothing() {
        let table = RefundPolicyTable::standard();
        for tier in CancellationPolicyTier::ALL {
            assert_eq!(table.percentage_for(tier, -2), Decimal::ZERO);
        }
    }

    #[test]
    fn highest_matching_percentage_wins_regardless_of_order() {
        let table = RefundPolicyTable::empty()
            .with_tier(
                CancellationPolicyTier::Flexible,
                vec![RefundRule::new(1, dec!(25)), RefundRule::new(7, dec!(100))],
            )
            .unwrap();
        assert_eq!(table.percentage_for(CancellationPolicyTier::Flexible, 10), dec!(100));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Flexible, 3), dec!(25));
        assert_eq!(table.percentage_for(CancellationPolicyTier::Strict, 30), Decimal::ZERO);
    }

    #[test]
    fn percentages_above_one_hundred_are_rejected() {
        let result = RefundPolicyTable::empty()
            .with_tier(CancellationPolicyTier::Strict, vec![RefundRule::new(1, dec!(120))]);
        assert!(matches!(result, Err(PricingError::InvalidRefundRule { .. })));
    }

    #[test]
    fn tiers_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&CancellationPolicyTier::SuperStrict).unwrap(),
            "\"SUPER_STRICT\""
        );
    }
}
