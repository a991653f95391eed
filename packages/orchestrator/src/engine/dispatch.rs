use alloy::primitives::Bytes;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use liquidot::{InvestmentIntent, PositionStatus};

use crate::chain::ChainError;
use crate::contracts::{IAssetHubVault, VaultContract};
use crate::db::{
    payload_digest, Db, OperationPhase, OperationRecord, OperationStatus, TransitionOutcome,
};

/// What became of one intent.
#[derive(Clone, Debug)]
pub enum DispatchOutcome {
    /// Hub accepted it; the position is now `PendingExecution`.
    Dispatched,
    /// A position with this fingerprint already moved past dispatch.
    AlreadyInFlight { status: PositionStatus },
    /// The hub rejected it; the position is `Cancelled`.
    Cancelled { reason: String },
}

/// Drive one intent through the hub: CAS-insert in `PendingDispatch`,
/// submit `dispatchInvestment` keyed by fingerprint, and advance to
/// `PendingExecution` once the `InvestmentInitiated` event is observed
/// in the receipt.
///
/// Transient chain failures return `Err` and leave the position in
/// `PendingDispatch` for the next cycle; the fingerprint key makes the
/// retry safe.
pub async fn dispatch_intent(
    db: &Db,
    vault: &VaultContract,
    intent: &InvestmentIntent,
    destination: &Bytes,
    cross_chain_message: &Bytes,
) -> Result<DispatchOutcome> {
    let fingerprint = intent.fingerprint;
    let inserted = db.insert_position(intent).await?;
    if !inserted {
        let position = db
            .get_position(fingerprint)
            .await?
            .context("Position vanished right after duplicate insert")?;
        if position.status != PositionStatus::PendingDispatch {
            return Ok(DispatchOutcome::AlreadyInFlight {
                status: position.status,
            });
        }
        // Still PendingDispatch: fall through and retry the submission;
        // the idempotency key resolves to the original transaction if
        // one already went out.
    }

    let calldata = VaultContract::dispatch_calldata(intent, destination, cross_chain_message);
    db.oplog_append(&OperationRecord {
        fingerprint,
        phase: OperationPhase::Dispatch,
        attempt: 1,
        idempotency_key: fingerprint.to_string(),
        payload_digest: payload_digest(&calldata),
        chain: intent.chain,
        tx_hash: None,
        status: OperationStatus::Submitted,
    })
    .await?;

    match vault
        .dispatch_investment(intent, destination, cross_chain_message)
        .await
    {
        Ok(receipt) => {
            db.oplog_update(
                &fingerprint.to_string(),
                Some(receipt.tx_hash),
                OperationStatus::Confirmed,
            )
            .await?;
            let initiated = receipt.logs.iter().any(|log| {
                log.topics.first()
                    == Some(&IAssetHubVault::InvestmentInitiated::SIGNATURE_HASH)
                    && log.topics.get(1) == Some(&fingerprint.word())
            });
            anyhow::ensure!(
                initiated,
                "Dispatch transaction {} for {fingerprint} included no InvestmentInitiated event",
                receipt.tx_hash
            );
            let outcome = db
                .transition(
                    fingerprint,
                    PositionStatus::PendingDispatch,
                    PositionStatus::PendingExecution,
                )
                .await?;
            if let TransitionOutcome::Refused { actual } = outcome {
                tracing::warn!(
                    "Dispatch for {fingerprint} confirmed but position moved to {actual} underneath us"
                );
            }
            Ok(DispatchOutcome::Dispatched)
        }
        Err(err @ ChainError::SimulationReverted { .. })
        | Err(err @ ChainError::IncludedReverted { .. }) => {
            let reason = err.to_string();
            let (tx_hash, status) = match &err {
                ChainError::IncludedReverted { tx_hash } => {
                    (Some(*tx_hash), OperationStatus::Reverted)
                }
                _ => (None, OperationStatus::Failed),
            };
            db.oplog_update(&fingerprint.to_string(), tx_hash, status)
                .await?;
            db.transition(
                fingerprint,
                PositionStatus::PendingDispatch,
                PositionStatus::Cancelled,
            )
            .await?;
            tracing::warn!("Cancelled investment {fingerprint}: {reason}");
            Ok(DispatchOutcome::Cancelled { reason })
        }
        Err(err) => Err(err).context("Transient failure dispatching investment"),
    }
}
