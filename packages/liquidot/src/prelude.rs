//! Convenience re-exports for downstream crates.

pub use crate::{
    BasisPoints, ChainId, Error, Fingerprint, InvestmentIntent, PoolId, PoolSnapshot, Position,
    PositionStatus, Preferences, TokenInfo,
};

pub use alloy_primitives::{Address, B256, U256};
