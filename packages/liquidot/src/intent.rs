use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{BasisPoints, ChainId, Error, Fingerprint, Preferences};

/// Widest range bound the system accepts, in basis points either side of
/// the entry price.
pub const MAX_RANGE_BPS: i32 = 50_000;

/// A validated instruction to open a position, produced by the decision
/// engine and consumed by the dispatcher.
///
/// Construction is the single validation point for investment inputs:
/// anything that passes here is safe to hash, persist and submit. Nothing
/// touches the store or a chain on a rejected intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentIntent {
    pub fingerprint: Fingerprint,
    pub user: Address,
    pub chain: ChainId,
    pub pool: Address,
    pub base_asset: Address,
    pub amount: U256,
    pub lower_bound_bps: BasisPoints,
    pub upper_bound_bps: BasisPoints,
    pub nonce: u64,
}

impl InvestmentIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user: Address,
        chain: ChainId,
        pool: Address,
        base_asset: Address,
        amount: U256,
        lower_bound_bps: BasisPoints,
        upper_bound_bps: BasisPoints,
        nonce: u64,
        prefs: &Preferences,
    ) -> Result<Self, Error> {
        let fail = |reason: String| Err(Error::InvalidIntent { reason });
        if amount.is_zero() {
            return fail("zero amount".to_owned());
        }
        let (lower, upper) = (lower_bound_bps.raw(), upper_bound_bps.raw());
        // Covers both the inverted and the zero-width range.
        if lower >= upper {
            return fail(format!("lower bound {lower}bps >= upper bound {upper}bps"));
        }
        if lower.abs() > MAX_RANGE_BPS || upper.abs() > MAX_RANGE_BPS {
            return fail(format!(
                "range [{lower}, {upper}]bps exceeds +/-{MAX_RANGE_BPS}bps"
            ));
        }
        if !prefs.accepts_base_asset(base_asset) {
            return fail(format!("base asset {base_asset} not in user preferences"));
        }
        let fingerprint = Fingerprint::derive(
            user,
            chain,
            pool,
            base_asset,
            amount,
            lower_bound_bps,
            upper_bound_bps,
            nonce,
        );
        Ok(InvestmentIntent {
            fingerprint,
            user,
            chain,
            pool,
            base_asset,
            amount,
            lower_bound_bps,
            upper_bound_bps,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> Preferences {
        Preferences {
            min_apr_bps: 0,
            max_allocation_bps: BasisPoints::new(5000),
            base_assets: vec![Address::repeat_byte(0xaa)],
            risk_level: 3,
            stop_loss_bps: BasisPoints::new(-1000),
            take_profit_bps: BasisPoints::new(1000),
            slippage_bps: BasisPoints::new(100),
        }
    }

    fn build(
        amount: u64,
        lower: i32,
        upper: i32,
        base: Address,
    ) -> Result<InvestmentIntent, Error> {
        InvestmentIntent::new(
            Address::repeat_byte(1),
            ChainId::new(420),
            Address::repeat_byte(2),
            base,
            U256::from(amount),
            BasisPoints::new(lower),
            BasisPoints::new(upper),
            1,
            &prefs(),
        )
    }

    #[test]
    fn valid_intent_accepted() {
        let intent = build(4000, -500, 1000, Address::repeat_byte(0xaa)).unwrap();
        assert_eq!(intent.amount, U256::from(4000u64));
    }

    #[test]
    fn zero_amount_rejected() {
        assert!(build(0, -500, 1000, Address::repeat_byte(0xaa)).is_err());
    }

    #[test]
    fn inverted_and_zero_range_rejected() {
        assert!(build(4000, 1000, -500, Address::repeat_byte(0xaa)).is_err());
        assert!(build(4000, 500, 500, Address::repeat_byte(0xaa)).is_err());
    }

    #[test]
    fn unknown_base_asset_rejected() {
        assert!(build(4000, -500, 1000, Address::repeat_byte(0xbb)).is_err());
    }

    #[test]
    fn oversized_range_rejected() {
        assert!(build(4000, -60_000, 1000, Address::repeat_byte(0xaa)).is_err());
    }

    #[test]
    fn same_content_same_fingerprint() {
        let a = build(4000, -500, 1000, Address::repeat_byte(0xaa)).unwrap();
        let b = build(4000, -500, 1000, Address::repeat_byte(0xaa)).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
