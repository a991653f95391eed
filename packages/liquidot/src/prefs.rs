use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{BasisPoints, Error};

/// Per-user investment policy.
///
/// Validated on construction and again when loaded from the store; a row
/// that fails validation is rejected rather than silently clamped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Minimum acceptable annualized yield, in basis points.
    pub min_apr_bps: u32,
    /// Maximum fraction of the user's balance allocated to a single pool.
    /// Must be in (0, 10_000].
    pub max_allocation_bps: BasisPoints,
    /// Base assets the user is willing to hold, in preference order.
    pub base_assets: Vec<Address>,
    /// Risk appetite from 1 (conservative) to 5 (aggressive).
    pub risk_level: u8,
    /// Stop-loss threshold relative to entry value. Zero or negative.
    pub stop_loss_bps: BasisPoints,
    /// Take-profit threshold relative to entry value. Strictly positive.
    pub take_profit_bps: BasisPoints,
    /// Slippage tolerance applied to liquidation quotes, in [0, 10_000].
    pub slippage_bps: BasisPoints,
}

impl Preferences {
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |reason: String| Err(Error::InvalidPreferences { reason });
        let alloc = self.max_allocation_bps.raw();
        if alloc <= 0 || alloc > 10_000 {
            return fail(format!("max allocation {alloc}bps not in (0, 10000]"));
        }
        if self.base_assets.is_empty() {
            return fail("no base assets configured".to_owned());
        }
        if !(1..=5).contains(&self.risk_level) {
            return fail(format!("risk level {} not in 1..=5", self.risk_level));
        }
        if self.stop_loss_bps.raw() > 0 {
            return fail(format!(
                "stop-loss must be zero or negative, got {}",
                self.stop_loss_bps
            ));
        }
        if self.take_profit_bps.raw() <= 0 {
            return fail(format!(
                "take-profit must be positive, got {}",
                self.take_profit_bps
            ));
        }
        let slippage = self.slippage_bps.raw();
        if !(0..=10_000).contains(&slippage) {
            return fail(format!("slippage {slippage}bps not in [0, 10000]"));
        }
        Ok(())
    }

    pub fn accepts_base_asset(&self, asset: Address) -> bool {
        self.base_assets.contains(&asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Preferences {
        Preferences {
            min_apr_bps: 500,
            max_allocation_bps: BasisPoints::new(5000),
            base_assets: vec![Address::repeat_byte(0x11)],
            risk_level: 3,
            stop_loss_bps: BasisPoints::new(-1000),
            take_profit_bps: BasisPoints::new(2000),
            slippage_bps: BasisPoints::new(100),
        }
    }

    #[test]
    fn valid_preferences_pass() {
        valid().validate().unwrap();
    }

    #[test]
    fn positive_stop_loss_rejected() {
        let mut prefs = valid();
        prefs.stop_loss_bps = BasisPoints::new(10);
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn zero_take_profit_rejected() {
        let mut prefs = valid();
        prefs.take_profit_bps = BasisPoints::ZERO;
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn allocation_bounds() {
        let mut prefs = valid();
        prefs.max_allocation_bps = BasisPoints::ZERO;
        assert!(prefs.validate().is_err());
        prefs.max_allocation_bps = BasisPoints::new(10_001);
        assert!(prefs.validate().is_err());
        prefs.max_allocation_bps = BasisPoints::new(10_000);
        assert!(prefs.validate().is_ok());
    }
}
