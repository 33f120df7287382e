//! Price arithmetic shared by serializers and reports.
//!
//! Prices are `rust_decimal::Decimal` values in the store currency with two
//! decimal places. Computed prices are always rounded back to two places so
//! that the wire format stays stable (`"110.00"`, never `"110.0000000001"`).

use rust_decimal::{Decimal, RoundingStrategy};

/// Multiplier applied to a unit price to include sales tax (10%).
pub const TAX_RATE: Decimal = Decimal::from_parts(11, 0, 0, false, 1);

/// Round an amount to the two decimal places used for currency.
///
/// Uses banker's rounding, matching `PostgreSQL` `NUMERIC(6, 2)` storage of
/// values that were already rounded by the client.
#[must_use]
pub fn to_currency(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    rounded
}

/// Unit price including tax, rounded to currency precision.
///
/// ```rust
/// use rust_decimal::Decimal;
/// use storefront_core::price_with_tax;
///
/// assert_eq!(price_with_tax(Decimal::from(100)).to_string(), "110.00");
/// ```
#[must_use]
pub fn price_with_tax(unit_price: Decimal) -> Decimal {
    to_currency(unit_price * TAX_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_value() {
        assert_eq!(TAX_RATE.to_string(), "1.1");
    }

    #[test]
    fn test_price_with_tax_rounds_to_cents() {
        assert_eq!(price_with_tax(Decimal::new(1999, 2)).to_string(), "21.99");
        assert_eq!(price_with_tax(Decimal::new(1, 0)).to_string(), "1.10");
    }

    #[test]
    fn test_to_currency_pads_scale() {
        assert_eq!(to_currency(Decimal::from(5)).to_string(), "5.00");
        assert_eq!(to_currency(Decimal::new(12_345, 3)).to_string(), "12.34");
    }
}
