//! Fixed-point reward amounts
//!
//! Amounts are kept as integer counts of the smallest currency unit so that
//! proportional splits never accumulate floating point drift.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits of one whole token
pub const AMOUNT_DECIMALS: u32 = 12;

/// Smallest units per whole token
pub const UNIT: u128 = 10u128.pow(AMOUNT_DECIMALS);

/// Fee rates are stored in parts per million
const FEE_RATE_SCALE: u128 = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Too many decimal places (max {AMOUNT_DECIMALS}): {0}")]
    TooPrecise(String),

    #[error("Fee must be between 0 and 1, got {0}")]
    FeeOutOfRange(f64),
}

/// Token amount in smallest units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_base_units(units: u128) -> Self {
        Amount(units)
    }

    /// Whole tokens, e.g. `Amount::from_tokens(100)` is 100 tokens
    pub const fn from_tokens(tokens: u64) -> Self {
        Amount(tokens as u128 * UNIT)
    }

    pub const fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// `self * numerator / denominator`, rounded down.
    ///
    /// Returns zero when `denominator` is zero.
    pub fn mul_div(self, numerator: u128, denominator: u128) -> Amount {
        if denominator == 0 {
            return Amount::ZERO;
        }
        match self.0.checked_mul(numerator) {
            Some(product) => Amount(product / denominator),
            // split to avoid overflow: (q * d + r) * n / d = q * n + r * n / d
            None => {
                let q = self.0 / denominator;
                let r = self.0 % denominator;
                Amount(
                    q.saturating_mul(numerator)
                        .saturating_add(r.saturating_mul(numerator) / denominator),
                )
            }
        }
    }

    /// Share of this amount taken by `rate`
    pub fn apply_rate(self, rate: FeeRate) -> Amount {
        self.mul_div(rate.parts_per_million() as u128, FEE_RATE_SCALE)
    }

    /// Lossy conversion used by metrics gauges
    pub fn as_tokens_f64(&self) -> f64 {
        self.0 as f64 / UNIT as f64
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parses a decimal token amount such as `"100"` or `"67.5"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = AMOUNT_DECIMALS as usize);
            padded
                .parse()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };

        whole
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| AmountError::Invalid(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:0>width$}", frac, width = AMOUNT_DECIMALS as usize);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

/// Fraction of the reward pool kept by the load balancer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate(u32);

impl FeeRate {
    pub fn from_fraction(fraction: f64) -> Result<Self, AmountError> {
        if !(0.0..=1.0).contains(&fraction) || fraction.is_nan() {
            return Err(AmountError::FeeOutOfRange(fraction));
        }
        Ok(FeeRate((fraction * FEE_RATE_SCALE as f64).round() as u32))
    }

    pub fn parts_per_million(&self) -> u32 {
        self.0
    }

    pub fn as_fraction(&self) -> f64 {
        self.0 as f64 / FEE_RATE_SCALE as f64
    }
}
