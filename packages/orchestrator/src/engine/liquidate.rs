//! Two-phase, quote-gated liquidation.
//!
//! Phase 0 establishes slippage-bounded minimums from a live quote and
//! commits them with the `Active -> LiquidationPending` CAS. Phase 1
//! burns and collects on the spoke. Phase 2 swaps to the base asset,
//! returns it across chains and settles on the hub. Every submission is
//! keyed for idempotency and checkpointed in the store, so a crash at
//! any point resumes exactly where it left off.

use std::time::Duration;

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use chrono::Utc;
use liquidot::{BasisPoints, Fingerprint, Position, PositionStatus};

use crate::chain::{ChainError, RawLog, Receipt};
use crate::contracts::{ILiquidityProxy, IAssetHubVault, ProxyContract, VaultContract};
use crate::db::{
    payload_digest, Db, OperationPhase, OperationRecord, OperationStatus, SettleOutcome,
};

use super::LiquidationReason;

#[derive(Clone, Debug)]
pub struct LiquidationSettings {
    /// User's slippage tolerance applied to every quote.
    pub slippage: BasisPoints,
    /// Quotes summing below this halt phase 0.
    pub absolute_minimum: U256,
    /// Submission attempts per phase before the position is handed to
    /// the operator.
    pub retry_bound: u32,
    /// Wall-clock limit per phase.
    pub phase_deadline: Duration,
    /// Encoded hub location the spoke returns assets to.
    pub destination: Bytes,
}

/// Terminal report of one controller invocation.
#[derive(Clone, Debug)]
pub enum LiquidationOutcome {
    /// Phase 0 refused to commit; the position stays `Active` and no
    /// transaction was submitted.
    QuoteHalted { reason: String },
    /// A phase failed this cycle; the controller re-enters
    /// quote-and-commit on the next trigger.
    PhaseFailed {
        phase: &'static str,
        reason: String,
    },
    /// Retries exhausted or an invariant broke; the position is
    /// `Failed` and automation for it has stopped.
    Halted { reason: String },
    /// Proceeds are credited on the hub.
    Settled { amount: U256 },
    /// The position is in a status this controller has no business with.
    NotEligible { status: PositionStatus },
}

struct QuoteResult {
    min_out0: U256,
    min_out1: U256,
    expected_total: U256,
    min_total: U256,
}

enum Quote {
    Ready(QuoteResult),
    /// The quote itself failed or fell below the configured floor.
    Halted(String),
}

/// Drive one position as far toward `Settled` as the current cycle
/// allows. Re-entrant: each call inspects the persisted status and
/// resumes from there.
pub async fn run_liquidation(
    db: &Db,
    proxy: &ProxyContract,
    vault: &VaultContract,
    fingerprint: Fingerprint,
    settings: &LiquidationSettings,
    reason: LiquidationReason,
) -> Result<LiquidationOutcome> {
    tracing::info!("Liquidation requested for {fingerprint}: {reason}");
    loop {
        let position = db
            .get_position(fingerprint)
            .await?
            .with_context(|| format!("Liquidation requested for unknown position {fingerprint}"))?;
        match position.status {
            PositionStatus::Active => {
                match phase0_commit(db, proxy, &position, settings).await? {
                    Some(outcome) => return Ok(outcome),
                    None => continue,
                }
            }
            PositionStatus::LiquidationPending => {
                match phase1_burn(db, proxy, &position, settings).await? {
                    Some(outcome) => return Ok(outcome),
                    None => continue,
                }
            }
            PositionStatus::Liquidated => {
                return phase2_settle(db, proxy, vault, &position, settings).await;
            }
            PositionStatus::Settled => {
                return Ok(LiquidationOutcome::Settled {
                    amount: position.settled_amount.unwrap_or_default(),
                });
            }
            status => return Ok(LiquidationOutcome::NotEligible { status }),
        }
    }
}

/// Phase 0: quote and commit. Returns `None` to continue into phase 1.
async fn phase0_commit(
    db: &Db,
    proxy: &ProxyContract,
    position: &Position,
    settings: &LiquidationSettings,
) -> Result<Option<LiquidationOutcome>> {
    if position.nft_id.is_none() {
        let reason = "active position without an NFT id";
        db.fail_position(position.fingerprint, reason).await?;
        return Ok(Some(LiquidationOutcome::Halted {
            reason: reason.to_owned(),
        }));
    }
    let quote = match compute_quote(db, proxy, position, settings).await? {
        Quote::Ready(quote) => quote,
        Quote::Halted(reason) => {
            tracing::warn!(
                "Quote halted for {}: {reason}; position stays active",
                position.fingerprint
            );
            return Ok(Some(LiquidationOutcome::QuoteHalted { reason }));
        }
    };
    let deadline = Utc::now()
        + chrono::Duration::from_std(settings.phase_deadline)
            .context("phase deadline out of range")?;
    db.commit_liquidation(
        position.fingerprint,
        position.base_asset,
        quote.min_out0,
        quote.min_out1,
        quote.min_total,
        deadline,
    )
    .await?;
    tracing::info!(
        "Committed liquidation for {}: expected {} min {}",
        position.fingerprint,
        quote.expected_total,
        quote.min_total
    );
    Ok(None)
}

/// Phase 1: burn and collect. Returns `None` once the store shows
/// `Liquidated` so the caller proceeds to phase 2.
async fn phase1_burn(
    db: &Db,
    proxy: &ProxyContract,
    position: &Position,
    settings: &LiquidationSettings,
) -> Result<Option<LiquidationOutcome>> {
    let fingerprint = position.fingerprint;
    let attempt = db
        .oplog_attempts(fingerprint, OperationPhase::Liquidate)
        .await?
        + 1;
    if attempt > settings.retry_bound {
        let reason = format!(
            "burn attempts exhausted ({} of {})",
            attempt - 1,
            settings.retry_bound
        );
        db.fail_position(fingerprint, &reason).await?;
        return Ok(Some(LiquidationOutcome::Halted { reason }));
    }
    // Prices moved since the last attempt; refresh the committed
    // minimums before submitting again.
    if attempt > 1 {
        match compute_quote(db, proxy, position, settings).await? {
            Quote::Ready(quote) => {
                let deadline = Utc::now()
                    + chrono::Duration::from_std(settings.phase_deadline)
                        .context("phase deadline out of range")?;
                db.commit_liquidation(
                    fingerprint,
                    position.base_asset,
                    quote.min_out0,
                    quote.min_out1,
                    quote.min_total,
                    deadline,
                )
                .await?;
            }
            Quote::Halted(reason) => {
                return Ok(Some(LiquidationOutcome::PhaseFailed {
                    phase: "re-quote",
                    reason,
                }));
            }
        }
    }
    let nft_id = position
        .nft_id
        .context("liquidation-pending position without an NFT id")?;
    let position_id = U256::from(nft_id);
    let key = format!("{fingerprint}:liquidate:{attempt}");
    db.oplog_append(&OperationRecord {
        fingerprint,
        phase: OperationPhase::Liquidate,
        attempt,
        idempotency_key: key.clone(),
        payload_digest: payload_digest(&ProxyContract::liquidation_calldata(position_id)),
        chain: proxy.chain_id(),
        tx_hash: None,
        status: OperationStatus::Submitted,
    })
    .await?;
    let submitted = tokio::time::timeout(
        settings.phase_deadline,
        proxy.execute_full_liquidation(fingerprint, position_id, attempt),
    )
    .await;
    match submitted {
        Err(_) => {
            db.oplog_update(&key, None, OperationStatus::Failed).await?;
            Ok(Some(LiquidationOutcome::PhaseFailed {
                phase: "burn",
                reason: format!("phase deadline of {:?} exceeded", settings.phase_deadline),
            }))
        }
        Ok(Ok(receipt)) => {
            db.oplog_update(&key, Some(receipt.tx_hash), OperationStatus::Confirmed)
                .await?;
            // The monitor will observe the same event from the tail;
            // both paths land on the same idempotent CAS.
            if let Some((amount0, amount1)) = burn_amounts(&receipt, position_id) {
                db.mark_liquidated(fingerprint, amount0, amount1).await?;
            } else {
                tracing::warn!(
                    "Burn receipt {} carried no PositionLiquidated event; waiting for the tail",
                    receipt.tx_hash
                );
                return Ok(Some(LiquidationOutcome::PhaseFailed {
                    phase: "burn",
                    reason: "burn succeeded but event not yet observed".to_owned(),
                }));
            }
            Ok(None)
        }
        Ok(Err(err)) if err.is_revert() => {
            let (tx_hash, status) = revert_details(&err);
            db.oplog_update(&key, tx_hash, status).await?;
            tracing::warn!(
                "Burn attempt {attempt} for {fingerprint} reverted: {err}; will re-quote"
            );
            Ok(Some(LiquidationOutcome::PhaseFailed {
                phase: "burn",
                reason: err.to_string(),
            }))
        }
        Ok(Err(err)) => Err(err).context("Transient failure during burn submission"),
    }
}

/// Phase 2: swap-and-return on the spoke, then settle on the hub.
async fn phase2_settle(
    db: &Db,
    proxy: &ProxyContract,
    vault: &VaultContract,
    position: &Position,
    settings: &LiquidationSettings,
) -> Result<LiquidationOutcome> {
    let fingerprint = position.fingerprint;
    let nft_id = position
        .nft_id
        .context("liquidated position without an NFT id")?;
    let position_id = U256::from(nft_id);
    let pending = db.pending_settlement(fingerprint).await?;
    let (min_out0, min_out1, min_total) = match &pending {
        Some(record) => (record.min_out0, record.min_out1, record.min_total),
        None => {
            // Possible after a restart that lost phase 0's record to a
            // settle that already completed remotely; proceed unbounded
            // but loudly.
            tracing::warn!("No pending settlement record for {fingerprint}");
            (U256::ZERO, U256::ZERO, U256::ZERO)
        }
    };

    let attempt = db.oplog_attempts(fingerprint, OperationPhase::Return).await? + 1;
    if attempt > settings.retry_bound {
        let reason = format!(
            "swap-and-return attempts exhausted ({} of {})",
            attempt - 1,
            settings.retry_bound
        );
        db.fail_position(fingerprint, &reason).await?;
        return Ok(LiquidationOutcome::Halted { reason });
    }
    let key = format!("{fingerprint}:return:{attempt}");
    db.oplog_append(&OperationRecord {
        fingerprint,
        phase: OperationPhase::Return,
        attempt,
        idempotency_key: key.clone(),
        payload_digest: payload_digest(&ProxyContract::return_calldata(
            position_id,
            position.base_asset,
            &settings.destination,
            min_out0,
            min_out1,
        )),
        chain: proxy.chain_id(),
        tx_hash: None,
        status: OperationStatus::Submitted,
    })
    .await?;
    let submitted = tokio::time::timeout(
        settings.phase_deadline,
        proxy.swap_and_return(
            fingerprint,
            position_id,
            position.base_asset,
            &settings.destination,
            min_out0,
            min_out1,
            attempt,
        ),
    )
    .await;
    let receipt = match submitted {
        Err(_) => {
            db.oplog_update(&key, None, OperationStatus::Failed).await?;
            return Ok(LiquidationOutcome::PhaseFailed {
                phase: "swap-and-return",
                reason: format!("phase deadline of {:?} exceeded", settings.phase_deadline),
            });
        }
        Ok(Ok(receipt)) => receipt,
        Ok(Err(err)) if err.is_revert() => {
            let (tx_hash, status) = revert_details(&err);
            db.oplog_update(&key, tx_hash, status).await?;
            return Ok(LiquidationOutcome::PhaseFailed {
                phase: "swap-and-return",
                reason: err.to_string(),
            });
        }
        Ok(Err(err)) => {
            return Err(err).context("Transient failure during swap-and-return");
        }
    };
    db.oplog_update(&key, Some(receipt.tx_hash), OperationStatus::Confirmed)
        .await?;
    let Some(amount) = returned_amount(&receipt, fingerprint) else {
        return Ok(LiquidationOutcome::PhaseFailed {
            phase: "swap-and-return",
            reason: "no AssetsReturned event in receipt".to_owned(),
        });
    };
    // The on-chain minimums should have enforced this already; treat a
    // shortfall as a recorded phase failure rather than crediting less
    // than committed.
    if amount < min_total {
        db.oplog_update(&key, Some(receipt.tx_hash), OperationStatus::Failed)
            .await?;
        return Ok(LiquidationOutcome::PhaseFailed {
            phase: "swap-and-return",
            reason: format!("returned {amount} below committed minimum {min_total}"),
        });
    }
    db.observe_returned_assets(fingerprint, position.base_asset, amount)
        .await?;

    let settle_key = format!("{fingerprint}:settle");
    db.oplog_append(&OperationRecord {
        fingerprint,
        phase: OperationPhase::Settle,
        attempt: 1,
        idempotency_key: settle_key.clone(),
        payload_digest: payload_digest(&VaultContract::settle_calldata(fingerprint, amount)),
        chain: vault.chain_id(),
        tx_hash: None,
        status: OperationStatus::Submitted,
    })
    .await?;
    let settled = tokio::time::timeout(
        settings.phase_deadline,
        vault.settle_liquidation(fingerprint, amount),
    )
    .await;
    match settled {
        Err(_) => {
            db.oplog_update(&settle_key, None, OperationStatus::Failed)
                .await?;
            Ok(LiquidationOutcome::PhaseFailed {
                phase: "settle",
                reason: format!("phase deadline of {:?} exceeded", settings.phase_deadline),
            })
        }
        Ok(Ok(receipt)) => {
            db.oplog_update(&settle_key, Some(receipt.tx_hash), OperationStatus::Confirmed)
                .await?;
            let credited = settled_amount(&receipt, fingerprint).unwrap_or(amount);
            match db.record_settlement(fingerprint, credited).await? {
                SettleOutcome::Settled { amount } | SettleOutcome::AlreadySettled { amount } => {
                    Ok(LiquidationOutcome::Settled { amount })
                }
                SettleOutcome::Refused { actual } => Ok(LiquidationOutcome::PhaseFailed {
                    phase: "settle",
                    reason: format!("store refused settlement while position is {actual}"),
                }),
                SettleOutcome::Missing => anyhow::bail!(
                    "Position {fingerprint} vanished from the store during settlement"
                ),
            }
        }
        Ok(Err(err)) if err.is_revert() => {
            let (tx_hash, status) = revert_details(&err);
            db.oplog_update(&settle_key, tx_hash, status).await?;
            Ok(LiquidationOutcome::PhaseFailed {
                phase: "settle",
                reason: err.to_string(),
            })
        }
        Ok(Err(err)) => Err(err).context("Transient failure during settlement"),
    }
}

/// Quote the position's current amounts into the base asset and apply
/// the slippage haircut.
async fn compute_quote(
    db: &Db,
    proxy: &ProxyContract,
    position: &Position,
    settings: &LiquidationSettings,
) -> Result<Quote> {
    let Some(nft_id) = position.nft_id else {
        return Ok(Quote::Halted("position has no NFT id".to_owned()));
    };
    let details = match proxy.positions(U256::from(nft_id)).await {
        Ok(details) => details,
        Err(err) if err.is_retryable() => return Err(err.into()),
        Err(err) => return Ok(Quote::Halted(format!("position lookup failed: {err}"))),
    };
    let Some(pool) = db
        .get_pool(liquidot::PoolId {
            chain: position.chain,
            address: position.pool,
        })
        .await?
    else {
        return Ok(Quote::Halted("no pool snapshot for position".to_owned()));
    };
    let mut expected = [U256::ZERO, U256::ZERO];
    for (slot, (token, amount)) in [
        (pool.token0.address, details.amount0),
        (pool.token1.address, details.amount1),
    ]
    .into_iter()
    .enumerate()
    {
        if amount.is_zero() {
            continue;
        }
        if token == position.base_asset {
            expected[slot] = amount;
            continue;
        }
        match proxy
            .quote_exact_input_single(token, position.base_asset, pool.fee_tier, amount)
            .await
        {
            Ok(out) => expected[slot] = out,
            Err(err) if err.is_retryable() => return Err(err.into()),
            Err(err) => return Ok(Quote::Halted(format!("quote failed: {err}"))),
        }
    }
    let expected_total = expected[0]
        .checked_add(expected[1])
        .context("quote overflow")?;
    if expected_total < settings.absolute_minimum {
        return Ok(Quote::Halted(format!(
            "expected output {expected_total} below configured minimum {}",
            settings.absolute_minimum
        )));
    }
    Ok(Quote::Ready(QuoteResult {
        min_out0: settings.slippage.haircut(expected[0]),
        min_out1: settings.slippage.haircut(expected[1]),
        min_total: settings.slippage.haircut(expected_total),
        expected_total,
    }))
}

fn revert_details(err: &ChainError) -> (Option<alloy::primitives::B256>, OperationStatus) {
    match err {
        ChainError::IncludedReverted { tx_hash } => (Some(*tx_hash), OperationStatus::Reverted),
        _ => (None, OperationStatus::Failed),
    }
}

fn burn_amounts(receipt: &Receipt, position_id: U256) -> Option<(U256, U256)> {
    receipt.logs.iter().find_map(|log| {
        let event = decode_quiet::<ILiquidityProxy::PositionLiquidated>(log)?;
        (event.positionId == position_id).then_some((event.amount0, event.amount1))
    })
}

fn returned_amount(receipt: &Receipt, fingerprint: Fingerprint) -> Option<U256> {
    receipt.logs.iter().find_map(|log| {
        let event = decode_quiet::<ILiquidityProxy::AssetsReturned>(log)?;
        (event.fingerprint == fingerprint.word()).then_some(event.amount)
    })
}

fn settled_amount(receipt: &Receipt, fingerprint: Fingerprint) -> Option<U256> {
    receipt.logs.iter().find_map(|log| {
        let event = decode_quiet::<IAssetHubVault::Settled>(log)?;
        (event.fingerprint == fingerprint.word()).then_some(event.amount)
    })
}

fn decode_quiet<E: SolEvent>(log: &RawLog) -> Option<E> {
    if log.topics.first() != Some(&E::SIGNATURE_HASH) {
        return None;
    }
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).ok()
}
