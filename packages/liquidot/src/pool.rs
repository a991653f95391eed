use std::fmt::Display;

use alloy_primitives::{Address, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ChainId;

/// A pool is identified by the chain it lives on plus its contract address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId {
    pub chain: ChainId,
    pub address: Address,
}

impl Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.chain, self.address)
    }
}

/// One side of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
}

/// A normalized snapshot of a concentrated-liquidity pool, as ingested
/// from the analytics source.
///
/// Snapshots are refreshed on every ingestion cycle. `observed_at` drives
/// the freshness gate: a stale snapshot makes the pool ineligible for new
/// investments without affecting positions already open in it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub id: PoolId,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub tick_spacing: i32,
    /// Fee tier in hundredths of a basis point, as the DEX encodes it.
    pub fee_tier: u32,
    pub tvl_usd: BigDecimal,
    pub volume_24h_usd: BigDecimal,
    /// Most recent annualized yield estimate, in basis points.
    pub apr_bps: u32,
    pub sqrt_price: U256,
    pub tick: i32,
    pub observed_at: DateTime<Utc>,
}

impl PoolSnapshot {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.observed_at) <= max_age
    }

    /// Trade activity relative to locked value. Used as the volatility
    /// proxy for ranking ties: a pool turning over a larger share of its
    /// TVL per day is treated as more volatile.
    pub fn turnover(&self) -> BigDecimal {
        use bigdecimal::Zero;
        if self.tvl_usd.is_zero() {
            return BigDecimal::zero();
        }
        &self.volume_24h_usd / &self.tvl_usd
    }
}
