use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use liquidot::{Fingerprint, InvestmentIntent};

use crate::chain::{ChainError, ChainSubmitter, DynChain, Receipt, SubmitRequest, TxPlan};

use super::IAssetHubVault;

/// Typed wrapper around the hub vault.
///
/// Reads go straight to the chain adapter; writes go through the hub's
/// serialized writer with caller-chosen idempotency keys.
#[derive(Clone)]
pub struct VaultContract {
    chain: DynChain,
    submitter: ChainSubmitter,
    address: Address,
}

/// On-chain view of one position, as the vault reports it.
#[derive(Clone, Copy, Debug)]
pub struct VaultPosition {
    pub status: u8,
    pub amount: U256,
    pub user: Address,
}

impl VaultContract {
    pub fn new(chain: DynChain, submitter: ChainSubmitter, address: Address) -> Self {
        VaultContract {
            chain,
            submitter,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> liquidot::ChainId {
        self.chain.chain_id()
    }

    pub async fn get_user_balance(&self, user: Address) -> Result<U256, ChainError> {
        let calldata = IAssetHubVault::getUserBalanceCall { user }.abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = IAssetHubVault::getUserBalanceCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "getUserBalance", e))?;
        Ok(decoded.balance)
    }

    pub async fn get_position(&self, fingerprint: Fingerprint) -> Result<VaultPosition, ChainError> {
        let calldata = IAssetHubVault::getPositionCall {
            fingerprint: fingerprint.word(),
        }
        .abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = IAssetHubVault::getPositionCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "getPosition", e))?;
        Ok(VaultPosition {
            status: decoded.status,
            amount: decoded.amount,
            user: decoded.user,
        })
    }

    pub async fn supported_chains(&self, chain_id: u64) -> Result<bool, ChainError> {
        let calldata = IAssetHubVault::supportedChainsCall { chainId: chain_id }.abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = IAssetHubVault::supportedChainsCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "supportedChains", e))?;
        Ok(decoded.supported)
    }

    /// Raw calldata of a dispatch; recorded in the operation log as the
    /// payload digest source.
    pub fn dispatch_calldata(
        intent: &InvestmentIntent,
        destination: &Bytes,
        cross_chain_message: &Bytes,
    ) -> Vec<u8> {
        IAssetHubVault::dispatchInvestmentCall {
            user: intent.user,
            chainId: intent.chain.u64(),
            poolId: intent.pool,
            baseAsset: intent.base_asset,
            amount: intent.amount,
            lowerRangePercent: intent.lower_bound_bps.raw(),
            upperRangePercent: intent.upper_bound_bps.raw(),
            destinationEncodedLocation: destination.clone(),
            preBuiltCrossChainMessage: cross_chain_message.clone(),
        }
        .abi_encode()
    }

    pub fn confirm_calldata(
        fingerprint: Fingerprint,
        remote_position_id: U256,
        liquidity: u128,
    ) -> Vec<u8> {
        IAssetHubVault::confirmExecutionCall {
            fingerprint: fingerprint.word(),
            remotePositionId: remote_position_id,
            liquidity,
        }
        .abi_encode()
    }

    pub fn settle_calldata(fingerprint: Fingerprint, amount: U256) -> Vec<u8> {
        IAssetHubVault::settleLiquidationCall {
            fingerprint: fingerprint.word(),
            amount,
        }
        .abi_encode()
    }

    /// Submit the investment dispatch. Idempotency key is the
    /// fingerprint, so a crash-and-retry resolves to the original
    /// transaction.
    pub async fn dispatch_investment(
        &self,
        intent: &InvestmentIntent,
        destination: &Bytes,
        cross_chain_message: &Bytes,
    ) -> Result<Receipt, ChainError> {
        let calldata = Self::dispatch_calldata(intent, destination, cross_chain_message);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: intent.fingerprint.to_string(),
                plan: TxPlan::new(self.address, calldata),
                description: format!("dispatch investment {}", intent.fingerprint),
            })
            .await
    }

    pub async fn confirm_execution(
        &self,
        fingerprint: Fingerprint,
        remote_position_id: U256,
        liquidity: u128,
    ) -> Result<Receipt, ChainError> {
        let calldata = Self::confirm_calldata(fingerprint, remote_position_id, liquidity);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: format!("{fingerprint}:confirm"),
                plan: TxPlan::new(self.address, calldata),
                description: format!("confirm execution {fingerprint}"),
            })
            .await
    }

    /// Credit the user on the hub. Keyed by fingerprint alone: between
    /// the writer's idempotent broadcast, the vault's own idempotency
    /// and the store's monotone settle, a duplicate can never
    /// double-credit.
    pub async fn settle_liquidation(
        &self,
        fingerprint: Fingerprint,
        amount: U256,
    ) -> Result<Receipt, ChainError> {
        let calldata = Self::settle_calldata(fingerprint, amount);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: format!("{fingerprint}:settle"),
                plan: TxPlan::new(self.address, calldata),
                description: format!("settle liquidation {fingerprint}"),
            })
            .await
    }
}

pub(super) fn decode_error(
    chain: &DynChain,
    what: &str,
    err: alloy::sol_types::Error,
) -> ChainError {
    ChainError::Network {
        chain: chain.chain_id(),
        message: format!("failed to decode {what} return data: {err}"),
    }
}

/// Topic0 values the hub monitor subscribes to.
pub fn hub_event_topics() -> Vec<B256> {
    use alloy::sol_types::SolEvent;
    vec![
        IAssetHubVault::InvestmentInitiated::SIGNATURE_HASH,
        IAssetHubVault::Settled::SIGNATURE_HASH,
        IAssetHubVault::PositionLiquidated::SIGNATURE_HASH,
        IAssetHubVault::Paused::SIGNATURE_HASH,
        IAssetHubVault::Unpaused::SIGNATURE_HASH,
    ]
}
