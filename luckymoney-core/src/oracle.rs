//! Split-amount oracle contract and output validation

use crate::{Error, Result};
use rust_decimal::Decimal;

/// Source of random share amounts.
///
/// `generate` must return exactly `count` amounts, each at least the
/// smallest unit at `precision`, summing to `total`. The engine re-checks
/// all of this and refuses the envelope otherwise.
pub trait SplitOracle: Send + Sync {
    /// Split `total` into `count` shares at `precision` decimal places
    fn generate(&self, total: Decimal, precision: u32, count: u32) -> Result<Vec<Decimal>>;
}

impl<F> SplitOracle for F
where
    F: Fn(Decimal, u32, u32) -> Result<Vec<Decimal>> + Send + Sync,
{
    fn generate(&self, total: Decimal, precision: u32, count: u32) -> Result<Vec<Decimal>> {
        self(total, precision, count)
    }
}

/// Smallest positive amount at `precision`
pub fn smallest_unit(precision: u32) -> Decimal {
    Decimal::new(1, precision)
}

/// Check a split against its envelope total
pub fn validate_split(total: Decimal, shares: &[Decimal], count: u32, precision: u32) -> Result<()> {
    if shares.len() != count as usize {
        return Err(Error::InvalidSplit(format!(
            "expected {} shares, got {}",
            count,
            shares.len()
        )));
    }

    let unit = smallest_unit(precision);
    let mut sum = Decimal::ZERO;
    for (i, share) in shares.iter().enumerate() {
        if *share < unit {
            return Err(Error::InvalidSplit(format!(
                "share {} is {}, below the smallest unit {}",
                i + 1,
                share,
                unit
            )));
        }
        if share.round_dp(precision) != *share {
            return Err(Error::InvalidSplit(format!(
                "share {} is {}, finer than {} decimal places",
                i + 1,
                share,
                precision
            )));
        }
        sum = sum
            .checked_add(*share)
            .ok_or_else(|| Error::InvalidSplit("share sum overflows".to_string()))?;
    }

    if sum != total {
        return Err(Error::InvalidSplit(format!(
            "shares sum to {}, total is {}",
            sum, total
        )));
    }

    Ok(())
}
