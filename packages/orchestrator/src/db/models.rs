use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liquidot::prelude::*;
use sqlx::FromRow;

/// A user plus their validated preferences, as loaded from the store.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub address: Address,
    pub preferences: Preferences,
}

/// Phase of an outbound transaction, part of the operation-log key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationPhase {
    Dispatch,
    Execute,
    Confirm,
    Liquidate,
    Return,
    Settle,
}

impl OperationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationPhase::Dispatch => "dispatch",
            OperationPhase::Execute => "execute",
            OperationPhase::Confirm => "confirm",
            OperationPhase::Liquidate => "liquidate",
            OperationPhase::Return => "return",
            OperationPhase::Settle => "settle",
        }
    }
}

/// Last-seen chain status of a logged operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    /// Broadcast, inclusion unknown.
    Submitted,
    /// Included and succeeded.
    Confirmed,
    /// Included but reverted.
    Reverted,
    /// Never broadcast (simulation failure) or abandoned.
    Failed,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Submitted => "submitted",
            OperationStatus::Confirmed => "confirmed",
            OperationStatus::Reverted => "reverted",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "submitted" => Ok(OperationStatus::Submitted),
            "confirmed" => Ok(OperationStatus::Confirmed),
            "reverted" => Ok(OperationStatus::Reverted),
            "failed" => Ok(OperationStatus::Failed),
            other => anyhow::bail!("Unknown operation status: {other}"),
        }
    }
}

/// One row of the append-only operation log.
#[derive(Clone, Debug)]
pub struct OperationRecord {
    pub fingerprint: Fingerprint,
    pub phase: OperationPhase,
    pub attempt: u32,
    pub idempotency_key: String,
    pub payload_digest: String,
    pub chain: ChainId,
    pub tx_hash: Option<B256>,
    pub status: OperationStatus,
}

/// Settlement expectations committed at liquidation phase 0, refreshed
/// by `AssetsReturned` observations.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingSettlement {
    pub fingerprint: Fingerprint,
    pub expected_token: Address,
    pub min_out0: U256,
    pub min_out1: U256,
    /// Minimum acceptable total in the base asset; the slippage floor.
    pub min_total: U256,
    /// Amount reported by `AssetsReturned`, if observed yet.
    pub observed_amount: Option<U256>,
    pub deadline: DateTime<Utc>,
    /// Monotone sequence number, bumped on every re-commit.
    pub seq: i64,
}

#[derive(FromRow)]
pub(super) struct PositionRow {
    pub fingerprint: String,
    pub user_address: String,
    pub chain_id: i64,
    pub pool: String,
    pub base_asset: String,
    pub amount: String,
    pub lower_bound_bps: i32,
    pub upper_bound_bps: i32,
    pub status: String,
    pub entry_tick: Option<i32>,
    pub nft_id: Option<i64>,
    pub liquidity: Option<String>,
    pub fees_token0: String,
    pub fees_token1: String,
    pub remote_settlement_id: Option<i64>,
    pub settled_amount: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PositionRow {
    pub fn into_position(self) -> Result<Position> {
        Ok(Position {
            fingerprint: parse_fingerprint(&self.fingerprint)?,
            user: parse_address(&self.user_address)?,
            chain: ChainId::new(u64::try_from(self.chain_id).context("Negative chain id")?),
            pool: parse_address(&self.pool)?,
            base_asset: parse_address(&self.base_asset)?,
            amount: parse_amount(&self.amount)?,
            lower_bound_bps: BasisPoints::new(self.lower_bound_bps),
            upper_bound_bps: BasisPoints::new(self.upper_bound_bps),
            status: self
                .status
                .parse::<PositionStatus>()
                .context("Corrupt status column")?,
            entry_tick: self.entry_tick,
            nft_id: self
                .nft_id
                .map(|id| u64::try_from(id).context("Negative NFT id"))
                .transpose()?,
            liquidity: self.liquidity.as_deref().map(parse_amount).transpose()?,
            fees_token0: parse_amount(&self.fees_token0)?,
            fees_token1: parse_amount(&self.fees_token1)?,
            remote_settlement_id: self
                .remote_settlement_id
                .map(|id| u64::try_from(id).context("Negative settlement id"))
                .transpose()?,
            settled_amount: self.settled_amount.as_deref().map(parse_amount).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct PoolRow {
    pub chain_id: i64,
    pub address: String,
    pub token0: String,
    pub token0_decimals: i64,
    pub token1: String,
    pub token1_decimals: i64,
    pub tick_spacing: i32,
    pub fee_tier: i64,
    pub tvl_usd: String,
    pub volume_24h_usd: String,
    pub apr_bps: i64,
    pub sqrt_price: String,
    pub tick: i32,
    pub observed_at: DateTime<Utc>,
}

impl PoolRow {
    pub fn into_snapshot(self) -> Result<PoolSnapshot> {
        Ok(PoolSnapshot {
            id: PoolId {
                chain: ChainId::new(u64::try_from(self.chain_id).context("Negative chain id")?),
                address: parse_address(&self.address)?,
            },
            token0: TokenInfo {
                address: parse_address(&self.token0)?,
                decimals: u8::try_from(self.token0_decimals).context("token0 decimals")?,
            },
            token1: TokenInfo {
                address: parse_address(&self.token1)?,
                decimals: u8::try_from(self.token1_decimals).context("token1 decimals")?,
            },
            tick_spacing: self.tick_spacing,
            fee_tier: u32::try_from(self.fee_tier).context("fee tier")?,
            tvl_usd: self.tvl_usd.parse().context("Corrupt tvl_usd column")?,
            volume_24h_usd: self
                .volume_24h_usd
                .parse()
                .context("Corrupt volume column")?,
            apr_bps: u32::try_from(self.apr_bps).context("apr_bps")?,
            sqrt_price: parse_amount(&self.sqrt_price)?,
            tick: self.tick,
            observed_at: self.observed_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct PendingSettlementRow {
    pub fingerprint: String,
    pub expected_token: String,
    pub min_out0: String,
    pub min_out1: String,
    pub min_total: String,
    pub observed_amount: Option<String>,
    pub deadline: DateTime<Utc>,
    pub seq: i64,
}

impl PendingSettlementRow {
    pub fn into_record(self) -> Result<PendingSettlement> {
        Ok(PendingSettlement {
            fingerprint: parse_fingerprint(&self.fingerprint)?,
            expected_token: parse_address(&self.expected_token)?,
            min_out0: parse_amount(&self.min_out0)?,
            min_out1: parse_amount(&self.min_out1)?,
            min_total: parse_amount(&self.min_total)?,
            observed_amount: self
                .observed_amount
                .as_deref()
                .map(parse_amount)
                .transpose()?,
            deadline: self.deadline,
            seq: self.seq,
        })
    }
}

pub(super) fn parse_address(s: &str) -> Result<Address> {
    Address::from_str(s).with_context(|| format!("Corrupt address column: {s}"))
}

pub(super) fn parse_fingerprint(s: &str) -> Result<Fingerprint> {
    Fingerprint::from_str(s).with_context(|| format!("Corrupt fingerprint column: {s}"))
}

pub(super) fn parse_amount(s: &str) -> Result<U256> {
    U256::from_str(s).with_context(|| format!("Corrupt amount column: {s}"))
}

/// Canonical text form for address-like columns: 0x-prefixed lowercase.
pub(super) fn addr_text(address: Address) -> String {
    format!("{address:#x}")
}

pub(super) fn amount_text(amount: U256) -> String {
    amount.to_string()
}
