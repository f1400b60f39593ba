//! Prices on order lines.
//!
//! Amounts use decimal arithmetic and are read from strings (`"12.50"`), so
//! validation sees the exact amount the ordering app sent.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    /// Amount in the currency's standard unit (francs, not rappen).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Whether the amount is below zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

/// ISO 4217 currency codes accepted by EATECH tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    CHF,
    EUR,
    USD,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_price_deserializes_string_amount() {
        let price: Price = serde_json::from_str(r#"{"amount":"12.50","currencyCode":"CHF"}"#).unwrap();
        assert_eq!(price.amount, Decimal::new(1250, 2));
        assert_eq!(price.currency_code, CurrencyCode::CHF);
    }

    #[test]
    fn test_price_defaults_to_chf() {
        let price: Price = serde_json::from_str(r#"{"amount":"4.00"}"#).unwrap();
        assert_eq!(price.currency_code, CurrencyCode::CHF);
    }

    #[test]
    fn test_price_negative() {
        assert!(Price::new(Decimal::new(-1, 2), CurrencyCode::CHF).is_negative());
        assert!(!Price::new(Decimal::ZERO, CurrencyCode::CHF).is_negative());
    }
}
