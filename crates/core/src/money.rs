//! Exact-decimal arithmetic primitives.
//!
//! Every quantity and monetary amount in the stock core is a
//! [`rust_decimal::Decimal`]. Floating point never appears in a ledger total.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of fractional digits monetary totals are rounded to.
pub const MONEY_SCALE: u32 = 2;

/// A monetary amount in the tenant's base currency.
///
/// Intermediate results keep full precision; call [`Money::rounded`] when a
/// value is presented or persisted as a total.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Build from an integer number of minor units (cents).
    pub fn from_minor(minor: i64) -> Self {
        Self(Decimal::new(minor, MONEY_SCALE))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Round half away from zero to [`MONEY_SCALE`] digits.
    pub fn rounded(&self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Unit price times quantity.
    pub fn times(&self, quantity: Quantity) -> Self {
        Self(self.0 * quantity.value())
    }

    /// The given percentage of this amount.
    pub fn percent(&self, pct: Percentage) -> Self {
        Self(self.0 * pct.ratio())
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl ValueObject for Money {}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.rounded().0)
    }
}

/// A percentage expressed in percent units (`12.5` means 12.5%).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Percentage(Decimal);

impl Percentage {
    pub const ZERO: Percentage = Percentage(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation("percentage cannot be negative"));
        }
        Ok(Self(value))
    }

    /// `part / whole` as a percentage; `None` when `whole` is zero.
    pub fn from_ratio(part: Decimal, whole: Decimal) -> Option<Self> {
        if whole.is_zero() {
            return None;
        }
        Some(Self(part * Decimal::ONE_HUNDRED / whole))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Fraction of one (`12.5%` is `0.125`).
    pub fn ratio(&self) -> Decimal {
        self.0 / Decimal::ONE_HUNDRED
    }

    /// Round to the given number of fractional digits (for display).
    pub fn rounded(&self, dp: u32) -> Self {
        Self(self.0.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl ValueObject for Percentage {}

impl core::fmt::Display for Percentage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

/// A non-negative stock quantity. Direction (in/out) is carried separately.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Accepts zero and positive values.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::invalid_quantity(format!(
                "quantity cannot be negative (got {value})"
            )));
        }
        Ok(Self(value.normalize()))
    }

    /// Accepts strictly positive values only.
    pub fn positive(value: Decimal) -> DomainResult<Self> {
        let q = Self::new(value)?;
        if q.is_zero() {
            return Err(DomainError::invalid_quantity("quantity must be positive"));
        }
        Ok(q)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        let diff = self.0 - other.0;
        if diff.is_sign_negative() && !diff.is_zero() {
            None
        } else {
            Some(Quantity(diff))
        }
    }
}

impl ValueObject for Quantity {}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl From<u32> for Quantity {
    fn from(value: u32) -> Self {
        Quantity(Decimal::from(value))
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0.normalize(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_totals_do_not_drift() {
        let unit = Money::new(dec!(0.10));
        let total: Money = (0..10).map(|_| unit).sum();
        assert_eq!(total, Money::new(dec!(1.00)));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(Money::new(dec!(2.345)).rounded(), Money::new(dec!(2.35)));
        assert_eq!(Money::new(dec!(-2.345)).rounded(), Money::new(dec!(-2.35)));
        assert_eq!(Money::from_minor(1999).amount(), dec!(19.99));
    }

    #[test]
    fn percentage_of_money() {
        let pct = Percentage::new(dec!(12.5)).unwrap();
        assert_eq!(Money::new(dec!(80)).percent(pct), Money::new(dec!(10)));
        assert_eq!(pct.to_string(), "12.5%");
        assert!(Percentage::from_ratio(dec!(1), dec!(0)).is_none());
        assert_eq!(
            Percentage::from_ratio(dec!(5), dec!(20)).unwrap().value(),
            dec!(25)
        );
    }

    #[test]
    fn quantity_rejects_negative_and_zero_when_positive_required() {
        assert!(matches!(
            Quantity::new(dec!(-1)),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(matches!(
            Quantity::positive(dec!(0)),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert_eq!(Quantity::positive(dec!(2.50)).unwrap().value(), dec!(2.5));
    }

    #[test]
    fn quantity_deserialization_enforces_sign() {
        let ok: Quantity = serde_json::from_str("\"3.25\"").unwrap();
        assert_eq!(ok.value(), dec!(3.25));
        assert!(serde_json::from_str::<Quantity>("\"-3\"").is_err());
    }

    proptest! {
        #[test]
        fn price_times_quantity_matches_minor_unit_math(
            cents in 0i64..10_000_000,
            qty in 0u32..10_000,
        ) {
            let total = Money::from_minor(cents).times(Quantity::from(qty));
            prop_assert_eq!(total, Money::from_minor(cents * i64::from(qty)));
        }

        #[test]
        fn checked_sub_never_goes_negative(a in 0u32..1000, b in 0u32..1000) {
            let res = Quantity::from(a).checked_sub(Quantity::from(b));
            prop_assert_eq!(res.is_some(), a >= b);
        }
    }
}
