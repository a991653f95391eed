use alloy::primitives::U256;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use liquidot::{ChainId, Fingerprint};

use crate::chain::RawLog;
use crate::contracts::{
    IAssetHubVault, ILiquidityProxy, ProxyContract, VaultContract,
};
use crate::db::{
    payload_digest, Db, OperationPhase, OperationRecord, OperationStatus, SettleOutcome,
    TransitionOutcome,
};

/// Store effect of one hub event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubEffect {
    /// Nothing to do (unknown topic, or an event another component
    /// already acted on).
    None,
    /// The vault was paused or unpaused; dispatching must follow.
    PausedChanged { paused: bool },
    /// A settlement landed (or was re-delivered).
    Settled { fingerprint: Fingerprint, applied: bool },
}

/// Store effect of one spoke event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpokeEffect {
    None,
    /// LP position minted; position is Active now.
    Executed { fingerprint: Fingerprint },
    /// Burn and collect confirmed; phase 2 may proceed.
    Liquidated { fingerprint: Fingerprint },
    /// Cross-chain return observed; a monitoring hint only.
    AssetsReturned { fingerprint: Fingerprint },
}

/// Apply one hub event to the store. Idempotent: a re-delivered event
/// lands on a CAS that reports `AlreadyThere` and changes nothing.
pub async fn handle_hub_log(db: &Db, log: &RawLog) -> Result<HubEffect> {
    let Some(topic0) = log.topics.first() else {
        return Ok(HubEffect::None);
    };
    if *topic0 == IAssetHubVault::InvestmentInitiated::SIGNATURE_HASH {
        // The dispatcher already observed this in its own receipt.
        return Ok(HubEffect::None);
    }
    if *topic0 == IAssetHubVault::Settled::SIGNATURE_HASH {
        let event = decode::<IAssetHubVault::Settled>(log)?;
        let fingerprint = Fingerprint::from_word(event.fingerprint);
        let outcome = db.record_settlement(fingerprint, event.amount).await?;
        let applied = match outcome {
            SettleOutcome::Settled { .. } => true,
            SettleOutcome::AlreadySettled { .. } => false,
            SettleOutcome::Missing => {
                tracing::warn!("Settled event for unknown position {fingerprint}");
                false
            }
            SettleOutcome::Refused { actual } => {
                // Cross-source ordering is not guaranteed; the spoke's
                // PositionLiquidated may still be in flight. The next
                // delivery or the controller's own receipt will land it.
                tracing::warn!(
                    "Settled event for {fingerprint} arrived while position is {actual}; deferring"
                );
                false
            }
        };
        return Ok(HubEffect::Settled {
            fingerprint,
            applied,
        });
    }
    if *topic0 == IAssetHubVault::PositionLiquidated::SIGNATURE_HASH {
        // Hub-side mirror of the spoke event; the spoke tail is
        // authoritative for the Liquidated transition.
        return Ok(HubEffect::None);
    }
    if *topic0 == IAssetHubVault::Paused::SIGNATURE_HASH {
        return Ok(HubEffect::PausedChanged { paused: true });
    }
    if *topic0 == IAssetHubVault::Unpaused::SIGNATURE_HASH {
        return Ok(HubEffect::PausedChanged { paused: false });
    }
    Ok(HubEffect::None)
}

/// Apply one spoke event to the store.
///
/// `PositionExecuted` additionally acknowledges execution back to the
/// hub (`confirmExecution`), keyed so a re-delivery cannot double-send.
pub async fn handle_spoke_log(
    db: &Db,
    proxy: &ProxyContract,
    vault: &VaultContract,
    chain: ChainId,
    log: &RawLog,
) -> Result<SpokeEffect> {
    let Some(topic0) = log.topics.first() else {
        return Ok(SpokeEffect::None);
    };
    if *topic0 == ILiquidityProxy::PositionExecuted::SIGNATURE_HASH {
        let event = decode::<ILiquidityProxy::PositionExecuted>(log)?;
        let fingerprint = Fingerprint::from_word(event.fingerprint);
        let nft_id = u64::try_from(event.nftId).context("NFT id out of range")?;
        // The event does not carry the entry tick; read it back.
        let details = proxy.positions(event.nftId).await?;
        let outcome = db
            .mark_executed(fingerprint, nft_id, event.liquidity, details.entry_tick)
            .await?;
        match outcome {
            TransitionOutcome::Applied => {
                confirm_execution(db, vault, fingerprint, event.nftId, event.liquidity).await?;
                Ok(SpokeEffect::Executed { fingerprint })
            }
            TransitionOutcome::AlreadyThere => Ok(SpokeEffect::None),
            TransitionOutcome::Refused { actual } => {
                tracing::warn!(
                    "PositionExecuted for {fingerprint} while position is {actual}; ignoring"
                );
                Ok(SpokeEffect::None)
            }
            TransitionOutcome::Missing => {
                tracing::warn!("PositionExecuted for unknown position {fingerprint}");
                Ok(SpokeEffect::None)
            }
        }
    } else if *topic0 == ILiquidityProxy::PositionLiquidated::SIGNATURE_HASH {
        let event = decode::<ILiquidityProxy::PositionLiquidated>(log)?;
        let nft_id = u64::try_from(event.positionId).context("position id out of range")?;
        let Some(position) = db.find_by_nft(chain, nft_id).await? else {
            tracing::warn!("PositionLiquidated for unknown NFT {nft_id} on chain {chain}");
            return Ok(SpokeEffect::None);
        };
        let outcome = db
            .mark_liquidated(position.fingerprint, event.amount0, event.amount1)
            .await?;
        if outcome.changed() {
            Ok(SpokeEffect::Liquidated {
                fingerprint: position.fingerprint,
            })
        } else {
            Ok(SpokeEffect::None)
        }
    } else if *topic0 == ILiquidityProxy::AssetsReturned::SIGNATURE_HASH {
        let event = decode::<ILiquidityProxy::AssetsReturned>(log)?;
        let fingerprint = Fingerprint::from_word(event.fingerprint);
        db.observe_returned_assets(fingerprint, event.token, event.amount)
            .await?;
        Ok(SpokeEffect::AssetsReturned { fingerprint })
    } else {
        Ok(SpokeEffect::None)
    }
}

async fn confirm_execution(
    db: &Db,
    vault: &VaultContract,
    fingerprint: Fingerprint,
    nft_id: U256,
    liquidity: u128,
) -> Result<()> {
    let calldata = VaultContract::confirm_calldata(fingerprint, nft_id, liquidity);
    db.oplog_append(&OperationRecord {
        fingerprint,
        phase: OperationPhase::Confirm,
        attempt: 1,
        idempotency_key: format!("{fingerprint}:confirm"),
        payload_digest: payload_digest(&calldata),
        chain: vault.chain_id(),
        tx_hash: None,
        status: OperationStatus::Submitted,
    })
    .await?;
    let receipt = vault
        .confirm_execution(fingerprint, nft_id, liquidity)
        .await
        .context("confirmExecution failed")?;
    db.oplog_update(
        &format!("{fingerprint}:confirm"),
        Some(receipt.tx_hash),
        OperationStatus::Confirmed,
    )
    .await?;
    Ok(())
}

fn decode<E: SolEvent>(log: &RawLog) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .with_context(|| format!("Failed to decode event in tx {}", log.tx_hash))
}
