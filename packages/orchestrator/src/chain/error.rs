use std::time::Duration;

use alloy::primitives::B256;
use liquidot::ChainId;

/// Errors surfaced by the chain adapters, already classified so that
/// callers can decide retry-vs-halt without string matching.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ChainError {
    /// Transport-level failure. Retryable with backoff.
    #[error("network error on chain {chain}: {message}")]
    Network { chain: ChainId, message: String },

    /// A single RPC exceeded its deadline. Retryable.
    #[error("rpc deadline exceeded on chain {chain} after {elapsed:?}")]
    Timeout { chain: ChainId, elapsed: Duration },

    /// The node rejected our nonce. Retryable after the writer resyncs.
    #[error("nonce conflict on chain {chain}: {message}")]
    NonceConflict { chain: ChainId, message: String },

    /// eth_call / simulation reverted; the decoded reason if the node
    /// returned standard `Error(string)` data. Fatal for the attempt.
    #[error("simulation reverted: {reason}")]
    SimulationReverted { reason: String },

    /// The transaction was mined but its receipt reports failure. Fatal
    /// for the attempt.
    #[error("transaction {tx_hash} included but reverted")]
    IncludedReverted { tx_hash: B256 },

    /// A runtime-dependent claim from the assumptions manifest does not
    /// hold on this deployment. Fatal for the action, never retried.
    #[error("runtime assumption violated on chain {chain}: {claim}")]
    RuntimeAssumption { chain: ChainId, claim: String },

    /// The submission queue for this chain is closed (shutdown).
    #[error("chain {chain} writer is shut down")]
    WriterClosed { chain: ChainId },
}

impl ChainError {
    /// Transient failures worth another attempt without operator
    /// involvement.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Network { .. }
                | ChainError::Timeout { .. }
                | ChainError::NonceConflict { .. }
        )
    }

    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            ChainError::SimulationReverted { .. } | ChainError::IncludedReverted { .. }
        )
    }
}
