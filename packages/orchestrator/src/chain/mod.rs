//! Uniform read/write surface over the hub and spoke chains.
//!
//! Everything above this module speaks [`ChainBackend`]: a capability set
//! of event tailing, view calls, signed submission and receipt lookup.
//! The production implementation is [`EvmChain`]; tests plug in a mock.
//! A third backend for another parachain only needs to implement the
//! trait.

mod error;
mod events;
mod evm;
mod submitter;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use liquidot::ChainId;

pub use error::ChainError;
pub use events::EventTail;
pub use evm::{EvmChain, EvmChainConfig};
pub use submitter::{spawn_submitter, ChainSubmitter, SubmitRequest, SubmitterConfig};

/// An undecoded event log, normalized away from any particular RPC
/// library so mock backends stay cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A log query over one contract, bounded on both sides.
#[derive(Clone, Debug)]
pub struct LogRange {
    pub contract: Address,
    /// Restrict to these topic0 values; empty means all events.
    pub topics: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// An unsigned call the writer will sign and submit.
#[derive(Clone, Debug)]
pub struct TxPlan {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
}

impl TxPlan {
    pub fn new(to: Address, calldata: impl Into<Bytes>) -> Self {
        TxPlan {
            to,
            calldata: calldata.into(),
            value: U256::ZERO,
        }
    }
}

/// Normalized transaction receipt.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub logs: Vec<RawLog>,
}

/// Capability set shared by all chain adapters.
#[async_trait]
pub trait ChainBackend: Send + Sync + 'static {
    fn chain_id(&self) -> ChainId;

    /// Address of the operator credential this adapter signs with.
    fn operator(&self) -> Address;

    /// Current head block number.
    async fn head(&self) -> Result<u64, ChainError>;

    /// Execute a view function and return the raw ABI-encoded result.
    async fn call_view(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;

    /// Fetch decoded-but-raw logs for a bounded range, ordered by
    /// (block, log index).
    async fn get_logs(&self, range: &LogRange) -> Result<Vec<RawLog>, ChainError>;

    /// Dry-run a transaction, surfacing a decoded revert reason on
    /// failure.
    async fn simulate(&self, plan: &TxPlan) -> Result<(), ChainError>;

    /// Pending-inclusive transaction count of the operator; the writer's
    /// nonce resync source.
    async fn transaction_count(&self) -> Result<u64, ChainError>;

    /// Sign and broadcast. The caller owns nonce assignment.
    async fn submit(&self, plan: &TxPlan, nonce: u64) -> Result<B256, ChainError>;

    /// Fetch the receipt if the transaction is mined.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError>;

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Node/runtime identification string, reported in diagnostics.
    async fn runtime_version(&self) -> Result<String, ChainError>;

    /// Poll for inclusion until `deadline` elapses.
    async fn await_receipt(&self, tx_hash: B256, deadline: Duration) -> Result<Receipt, ChainError> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if started.elapsed() >= deadline {
                return Err(ChainError::Timeout {
                    chain: self.chain_id(),
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

pub type DynChain = Arc<dyn ChainBackend>;
