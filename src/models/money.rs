//! Fixed-point money helpers.
//!
//! Amounts travel through the domain as [`Decimal`] rounded to two places
//! and are persisted as integer minor units (cents).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

pub const MONEY_SCALE: u32 = 2;

/// Rounds an amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidAmount(format!("{} is out of range", amount)))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, MONEY_SCALE)
}

/// Subtotal of a line in cents. Products that leave the `i64` range are
/// rejected rather than wrapped.
pub fn line_subtotal_cents(unit_price_cents: i64, quantity: i32) -> Result<i64, ServiceError> {
    unit_price_cents
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| {
            ServiceError::InvalidAmount(format!(
                "Subtotal of {} units at {} is out of range",
                quantity,
                from_cents(unit_price_cents)
            ))
        })
}

/// Rounds and checks that the amount is strictly positive.
pub fn positive_amount(amount: Decimal, field: &str) -> Result<Decimal, ServiceError> {
    let rounded = round_money(amount);
    if rounded <= Decimal::ZERO {
        return Err(ServiceError::InvalidAmount(format!(
            "{} must be greater than zero, got {}",
            field, amount
        )));
    }
    Ok(rounded)
}

/// Rounds and checks that the amount is not negative.
pub fn non_negative_amount(amount: Decimal, field: &str) -> Result<Decimal, ServiceError> {
    let rounded = round_money(amount);
    if rounded < Decimal::ZERO {
        return Err(ServiceError::InvalidAmount(format!(
            "{} cannot be negative, got {}",
            field, amount
        )));
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_subtotals_refuse_to_overflow() {
        assert_eq!(line_subtotal_cents(1_250, 4).unwrap(), 5_000);
        assert!(matches!(
            line_subtotal_cents(i64::MAX / 2, 3),
            Err(ServiceError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
        assert_eq!(round_money(dec!(-0.125)), dec!(-0.13));
    }

    #[test]
    fn cents_conversion_is_exact() {
        assert_eq!(to_cents(dec!(130.00)).unwrap(), 13_000);
        assert_eq!(to_cents(dec!(0.01)).unwrap(), 1);
        assert_eq!(from_cents(13_000), dec!(130.00));
        assert_eq!(from_cents(to_cents(dec!(19.999)).unwrap()), dec!(20.00));
    }

    #[test]
    fn repeated_additions_do_not_drift() {
        let mut total = Decimal::ZERO;
        for _ in 0..1_000 {
            total += dec!(0.10);
        }
        assert_eq!(total, dec!(100.00));
    }

    #[test]
    fn amount_guards() {
        assert!(positive_amount(dec!(0.004), "amount").is_err());
        assert_eq!(positive_amount(dec!(0.005), "amount").unwrap(), dec!(0.01));
        assert!(non_negative_amount(dec!(-0.01), "price").is_err());
        assert_eq!(non_negative_amount(Decimal::ZERO, "price").unwrap(), Decimal::ZERO);
    }
}
