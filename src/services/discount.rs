//! Discount codes and their resolution against a cart subtotal.
//!
//! Resolution is a pure function of the code definition, the subtotal and the
//! clock. Carts only ever remember the code string; the amount is recomputed
//! from the live subtotal every time it is needed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::Money;
use crate::{EcommerceError, Result};

/// Value of the discount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountKind {
    /// Percentage off the subtotal (0 - 100).
    Percentage(Decimal),
    /// Fixed amount off, never more than the subtotal.
    FixedAmount(Money),
}

/// A discount code definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub code: String,
    pub kind: DiscountKind,
    pub valid_until: Option<DateTime<Utc>>,
    pub min_subtotal: Option<Money>,
    pub active: bool,
}

impl Discount {
    pub fn percentage(code: &str, percent: Decimal) -> Self {
        Self { code: normalize_code(code), kind: DiscountKind::Percentage(percent), valid_until: None, min_subtotal: None, active: true }
    }

    pub fn fixed_amount(code: &str, amount: Money) -> Self {
        Self { code: normalize_code(code), kind: DiscountKind::FixedAmount(amount), valid_until: None, min_subtotal: None, active: true }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self { self.valid_until = Some(at); self }

    pub fn with_minimum_subtotal(mut self, minimum: Money) -> Self { self.min_subtotal = Some(minimum); self }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.valid_until.is_some_and(|until| now > until) }

    /// Amount taken off `subtotal`, capped at the subtotal.
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let amount = match &self.kind {
            DiscountKind::Percentage(percent) => subtotal.percentage((*percent).clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)),
            DiscountKind::FixedAmount(amount) => *amount,
        };
        amount.min(subtotal)
    }
}

/// Canonical form of a code as typed by a customer.
pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

/// Outcome of applying a code to a subtotal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountResolution {
    pub applied: bool,
    pub code: String,
    pub discount_amount: Money,
    pub new_subtotal: Money,
    pub message: String,
}

pub struct DiscountResolver;

impl DiscountResolver {
    /// Discount amount for `code`, or why it does not apply.
    pub fn check(discount: Option<&Discount>, code: &str, subtotal: Money, now: DateTime<Utc>) -> Result<Money> {
        let code = normalize_code(code);
        let discount = discount.filter(|d| d.active && d.code == code).ok_or_else(|| EcommerceError::DiscountNotFound(code.clone()))?;
        if discount.is_expired(now) {
            return Err(EcommerceError::DiscountExpired(code));
        }
        if let Some(minimum) = discount.min_subtotal {
            if subtotal < minimum {
                return Err(EcommerceError::DiscountMinimumNotMet { code, minimum });
            }
        }
        Ok(discount.amount_for(subtotal))
    }

    pub fn resolve(discount: Option<&Discount>, code: &str, subtotal: Money, now: DateTime<Utc>) -> DiscountResolution {
        let normalized = normalize_code(code);
        match Self::check(discount, code, subtotal, now) {
            Ok(amount) => DiscountResolution {
                applied: true,
                message: format!("Discount {normalized} applied"),
                code: normalized,
                discount_amount: amount,
                new_subtotal: subtotal.saturating_sub(&amount),
            },
            Err(e) => DiscountResolution {
                applied: false,
                code: normalized,
                discount_amount: Money::zero(),
                new_subtotal: subtotal,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_percentage_discount() {
        let discount = Discount::percentage("save10", Decimal::TEN);
        let res = DiscountResolver::resolve(Some(&discount), "SAVE10", Money::from_major(200_000), Utc::now());
        assert!(res.applied);
        assert_eq!(res.discount_amount, Money::from_major(20_000));
        assert_eq!(res.new_subtotal, Money::from_major(180_000));
    }

    #[test]
    fn test_fixed_discount_capped() {
        let discount = Discount::fixed_amount("BIG", Money::from_major(10_000));
        let res = DiscountResolver::resolve(Some(&discount), "big", Money::from_major(5_000), Utc::now());
        // Capped at subtotal
        assert_eq!(res.discount_amount, Money::from_major(5_000));
        assert_eq!(res.new_subtotal, Money::zero());
    }

    #[test]
    fn test_unknown_code() {
        let res = DiscountResolver::resolve(None, " nope ", Money::from_major(100), Utc::now());
        assert!(!res.applied);
        assert_eq!(res.code, "NOPE");
        assert_eq!(res.new_subtotal, Money::from_major(100));
        assert!(res.message.contains("does not exist"));
    }

    #[test]
    fn test_expired_code() {
        let now = Utc::now();
        let discount = Discount::percentage("OLD", Decimal::TEN).expires_at(now - Duration::days(1));
        assert!(matches!(
            DiscountResolver::check(Some(&discount), "OLD", Money::from_major(100), now),
            Err(EcommerceError::DiscountExpired(_))
        ));
    }

    #[test]
    fn test_minimum_subtotal() {
        let discount = Discount::percentage("BULK", Decimal::TEN).with_minimum_subtotal(Money::from_major(500));
        let now = Utc::now();
        assert!(!DiscountResolver::resolve(Some(&discount), "BULK", Money::from_major(499), now).applied);
        assert!(DiscountResolver::resolve(Some(&discount), "BULK", Money::from_major(500), now).applied);
    }

    #[test]
    fn test_inactive_code_is_unknown() {
        let mut discount = Discount::percentage("OFF", Decimal::TEN);
        discount.active = false;
        assert!(matches!(
            DiscountResolver::check(Some(&discount), "OFF", Money::from_major(100), Utc::now()),
            Err(EcommerceError::DiscountNotFound(_))
        ));
    }
}
