//! Typed fixed-point amounts.
//!
//! Debt is denominated in `Stable` (18 decimals, raw `u128`). Collateral is
//! kept as raw `u128` in the token's native precision; the config's
//! `decimals` drives the conversions below. Ratios and prices are
//! `rust_decimal::Decimal` newtypes so the unit of every multiplication is
//! visible in the type.

use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

/// Number of decimals of the stable coin.
pub const STABLE_DECIMALS: u8 = 18;

/// One whole stable coin in raw units.
pub const E18: u128 = 1_000_000_000_000_000_000;

/// An amount of stable coin, raw units at 18 decimals.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Stable(u128);

impl Stable {
    pub const ZERO: Stable = Stable(0);

    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// `n` whole stable coins.
    pub const fn from_whole(n: u128) -> Self {
        Self(n * E18)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from_u128(self.0).expect("stable amount exceeds decimal range")
    }

    pub fn from_decimal(d: Decimal) -> Self {
        Self(d.trunc().to_u128().unwrap_or(0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl From<u128> for Stable {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl From<u64> for Stable {
    fn from(raw: u64) -> Self {
        Self(raw as u128)
    }
}

impl Add for Stable {
    type Output = Stable;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.checked_add(rhs.0).expect("stable amount overflow"))
    }
}

impl Sub for Stable {
    type Output = Stable;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.checked_sub(rhs.0).expect("stable amount underflow"))
    }
}

impl AddAssign for Stable {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Stable {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Sum for Stable {
    fn sum<I: Iterator<Item = Stable>>(iter: I) -> Self {
        iter.fold(Stable::ZERO, |acc, x| acc + x)
    }
}

impl PartialEq<u128> for Stable {
    fn eq(&self, other: &u128) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<u128> for Stable {
    fn partial_cmp(&self, other: &u128) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

impl Mul<Ratio> for Stable {
    type Output = Stable;
    fn mul(self, rhs: Ratio) -> Stable {
        Stable::from_decimal(self.to_decimal() * rhs.0)
    }
}

impl Div<Ratio> for Stable {
    type Output = Stable;
    fn div(self, rhs: Ratio) -> Stable {
        Stable::from_decimal(self.to_decimal() / rhs.0)
    }
}

impl Div<Stable> for Stable {
    type Output = Ratio;
    fn div(self, rhs: Stable) -> Ratio {
        Ratio(self.to_decimal() / rhs.to_decimal())
    }
}

impl fmt::Display for Stable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / E18;
        let frac = self.0 % E18;
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            let s = format!("{frac:018}");
            write!(f, "{}.{}", whole, s.trim_end_matches('0'))
        }
    }
}

/// A dimensionless ratio (collateralization ratio, fee rate, share).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ratio(pub Decimal);

impl Ratio {
    pub const fn new(d: Decimal) -> Self {
        Self(d)
    }

    pub const MAX: Ratio = Ratio(Decimal::MAX);

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(f64::MAX)
    }

    /// Exponentiation by squaring; used for per-minute decay factors.
    pub fn pow(self, mut exp: u64) -> Ratio {
        let mut base = self.0;
        let mut acc = Decimal::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc *= base;
            }
            exp >>= 1;
            if exp > 0 {
                base *= base;
            }
        }
        Ratio(acc)
    }

    pub fn min(self, other: Ratio) -> Ratio {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Ratio) -> Ratio {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }
}

impl From<Decimal> for Ratio {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Ratio {
    type Output = Ratio;
    fn add(self, rhs: Self) -> Ratio {
        Ratio(self.0 + rhs.0)
    }
}

impl Sub for Ratio {
    type Output = Ratio;
    fn sub(self, rhs: Self) -> Ratio {
        Ratio(self.0 - rhs.0)
    }
}

impl Mul for Ratio {
    type Output = Ratio;
    fn mul(self, rhs: Self) -> Ratio {
        Ratio(self.0 * rhs.0)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// USD price of one whole collateral token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const fn new(d: Decimal) -> Self {
        Self(d)
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn pow10(decimals: u8) -> Decimal {
    Decimal::from_u128(10u128.pow(decimals as u32)).expect("decimals out of range")
}

/// USD value (as `Stable`, 18 decimals) of a raw collateral amount.
pub fn collateral_value(raw_amount: u128, price: Price, decimals: u8) -> Stable {
    let whole = Decimal::from_u128(raw_amount).expect("collateral amount exceeds decimal range")
        / pow10(decimals);
    Stable::from_decimal(whole * price.0 * pow10(STABLE_DECIMALS))
}

/// Raw collateral amount equivalent to a stable amount at the given price.
/// Truncates toward zero; the dust stays with the trove.
pub fn stable_to_collateral(amount: Stable, price: Price, decimals: u8) -> u128 {
    let whole = amount.to_decimal() / pow10(STABLE_DECIMALS) / price.0;
    (whole * pow10(decimals)).trunc().to_u128().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn collateral_value_respects_token_decimals() {
        // 10 tokens at 6 decimals, price 2 USD => 20 stable
        assert_eq!(
            collateral_value(10_000_000, Price::new(dec!(2)), 6),
            Stable::from_whole(20)
        );
        // same position expressed at 18 decimals
        assert_eq!(
            collateral_value(10 * E18, Price::new(dec!(2)), 18),
            Stable::from_whole(20)
        );
    }

    #[test]
    fn stable_to_collateral_round_trips_within_dust() {
        let price = Price::new(dec!(3));
        let raw = stable_to_collateral(Stable::from_whole(9), price, 8);
        assert_eq!(raw, 300_000_000); // 3 tokens at 8 decimals
        let back = collateral_value(raw, price, 8);
        assert_eq!(back, Stable::from_whole(9));
    }

    #[test]
    fn ratio_pow_matches_repeated_multiplication() {
        let r = Ratio::new(dec!(0.94));
        let mut acc = Decimal::ONE;
        for _ in 0..7 {
            acc *= dec!(0.94);
        }
        assert_eq!(r.pow(7).0, acc);
        assert_eq!(r.pow(0).0, Decimal::ONE);
    }

    #[test]
    fn stable_display_is_human_scale() {
        assert_eq!(Stable::from_whole(5).to_string(), "5");
        assert_eq!(Stable::new(E18 / 2).to_string(), "0.5");
    }
}
