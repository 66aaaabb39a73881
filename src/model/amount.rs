use crate::model::constants::FIAT_DIGITS;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, iter::Sum, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseAmountError {
    /// Unable to parse decimal string.
    #[error("Unable to parse decimal string `{0}`")]
    Decimal(String, #[source] rust_decimal::Error),
}

/// An amount of units of some asset. The asset itself is tracked by the surrounding type.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Quantity(Decimal);

/// A monetary value denominated in the reporting fiat currency.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FiatAmount(Decimal);

macro_rules! impl_math_ops {
    ($name:ident) => {
        impl ::std::ops::Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl ::std::ops::AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl ::std::ops::Neg for $name {
            type Output = Self;

            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl ::std::ops::Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl ::std::ops::SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self::default(), |acc, amount| acc + amount)
            }
        }

        impl<'a> Sum<&'a $name> for $name {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                iter.copied().sum()
            }
        }

        impl From<Decimal> for $name {
            fn from(value: Decimal) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = ParseAmountError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                let value = Decimal::from_str(trimmed)
                    .or_else(|_| Decimal::from_scientific(trimmed))
                    .map_err(|err| ParseAmountError::Decimal(s.to_string(), err))?;

                Ok(Self(value.normalize()))
            }
        }

        impl $name {
            pub fn to_decimal(self) -> Decimal {
                self.0
            }

            pub fn is_zero(self) -> bool {
                self.0.is_zero()
            }

            pub fn is_positive(self) -> bool {
                self.0 > Decimal::ZERO
            }
        }
    };
}

impl_math_ops!(Quantity);
impl_math_ops!(FiatAmount);

impl Quantity {
    /// Fiat value of this quantity at the given unit price.
    pub fn value_at(self, price: Decimal) -> FiatAmount {
        FiatAmount(self.0 * price)
    }

    /// The fraction `self / whole`. Returns zero when `whole` is zero.
    pub fn ratio_of(self, whole: Quantity) -> Decimal {
        if whole.0.is_zero() {
            Decimal::ZERO
        } else {
            self.0 / whole.0
        }
    }
}

impl FiatAmount {
    /// Scale this amount by a dimensionless factor.
    pub fn scale(self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl fmt::Display for FiatAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Banker's rounding, only applied on output.
        let precision = FIAT_DIGITS;
        let amount = self.0.round_dp(precision);

        write!(f, "{amount:.precision$}", precision = precision as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        let amount: Quantity = "0.10000".parse().unwrap();
        assert_eq!(amount.to_string(), "0.1");

        let amount: Quantity = " 1e-3 ".parse().unwrap();
        assert_eq!(amount, Quantity::from(Decimal::new(1, 3)));

        assert!("abc".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_fiat_display_rounding() {
        let amount = FiatAmount::from(Decimal::new(12345, 3));
        assert_eq!(amount.to_string(), "12.34");

        let amount = FiatAmount::from(Decimal::new(12355, 3));
        assert_eq!(amount.to_string(), "12.36");

        let amount = -FiatAmount::from(Decimal::new(5, 1));
        assert_eq!(amount.to_string(), "-0.50");
    }

    #[test]
    fn test_ratio_and_value() {
        let part: Quantity = "2".parse().unwrap();
        let whole: Quantity = "8".parse().unwrap();
        assert_eq!(part.ratio_of(whole), Decimal::new(25, 2));
        assert_eq!(part.ratio_of(Quantity::default()), Decimal::ZERO);
        assert_eq!(
            part.value_at(Decimal::new(150, 1)),
            FiatAmount::from(Decimal::new(30, 0))
        );
    }
}
