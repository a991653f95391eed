use std::fmt::Display;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Signed fixed-point percentage with a scale factor of 10^-4.
///
/// 10_000 basis points == 100%. This is the only percentage representation
/// in the system: price range bounds, stop-loss/take-profit thresholds,
/// allocation caps and slippage tolerances are all carried as basis points
/// and stored as plain integers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BasisPoints(i32);

/// One hundred percent, in basis points.
pub const BPS_SCALE: i32 = 10_000;

impl BasisPoints {
    pub const ZERO: BasisPoints = BasisPoints(0);

    pub fn new(bps: i32) -> Self {
        BasisPoints(bps)
    }

    /// Construct, requiring the value to lie within `[min, max]`.
    pub fn new_bounded(bps: i32, min: i32, max: i32) -> Result<Self, Error> {
        if bps < min || bps > max {
            return Err(Error::BasisPointsOutOfRange {
                value: bps,
                min,
                max,
            });
        }
        Ok(BasisPoints(bps))
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `amount * bps / 10_000`, rounding down. Only meaningful for
    /// non-negative percentages; a negative multiplier yields zero.
    pub fn of_amount(self, amount: U256) -> U256 {
        if self.0 <= 0 {
            return U256::ZERO;
        }
        amount * U256::from(u64::try_from(self.0).unwrap_or_default()) / U256::from(10_000u64)
    }

    /// `amount * (1 - bps / 10_000)`, rounding down. Used for slippage
    /// haircuts: `min_out = expected.haircut(slippage)`.
    pub fn haircut(self, amount: U256) -> U256 {
        let bps = self.0.clamp(0, BPS_SCALE);
        let keep = u64::try_from(BPS_SCALE - bps).unwrap_or_default();
        amount * U256::from(keep) / U256::from(10_000u64)
    }
}

impl Display for BasisPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
