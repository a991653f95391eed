use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use liquidot::Fingerprint;

use crate::chain::{ChainError, ChainSubmitter, DynChain, Receipt, SubmitRequest, TxPlan};

use super::vault::decode_error;
use super::ILiquidityProxy;

/// Typed wrapper around a spoke-chain execution proxy.
#[derive(Clone)]
pub struct ProxyContract {
    chain: DynChain,
    submitter: ChainSubmitter,
    address: Address,
}

/// Spoke-side view of an LP position.
#[derive(Clone, Copy, Debug)]
pub struct ProxyPosition {
    pub fingerprint: Fingerprint,
    pub status: u8,
    pub liquidity: u128,
    pub entry_tick: i32,
    pub amount0: U256,
    pub amount1: U256,
}

impl ProxyContract {
    pub fn new(chain: DynChain, submitter: ChainSubmitter, address: Address) -> Self {
        ProxyContract {
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

    pub async fn quote_exact_input_single(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
    ) -> Result<U256, ChainError> {
        let calldata = ILiquidityProxy::quoteExactInputSingleCall {
            tokenIn: token_in,
            tokenOut: token_out,
            fee,
            amountIn: amount_in,
            sqrtPriceLimitX96: U256::ZERO,
        }
        .abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = ILiquidityProxy::quoteExactInputSingleCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "quoteExactInputSingle", e))?;
        Ok(decoded.amountOut)
    }

    pub async fn is_position_out_of_range(&self, position_id: U256) -> Result<bool, ChainError> {
        let calldata = ILiquidityProxy::isPositionOutOfRangeCall {
            positionId: position_id,
        }
        .abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = ILiquidityProxy::isPositionOutOfRangeCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "isPositionOutOfRange", e))?;
        Ok(decoded.outOfRange)
    }

    pub async fn positions(&self, position_id: U256) -> Result<ProxyPosition, ChainError> {
        let calldata = ILiquidityProxy::positionsCall {
            positionId: position_id,
        }
        .abi_encode();
        let ret = self.chain.call_view(self.address, calldata.into()).await?;
        let decoded = ILiquidityProxy::positionsCall::abi_decode_returns(&ret, false)
            .map_err(|e| decode_error(&self.chain, "positions", e))?;
        Ok(ProxyPosition {
            fingerprint: Fingerprint::from_word(decoded.fingerprint),
            status: decoded.status,
            liquidity: decoded.liquidity,
            entry_tick: decoded.entryTick,
            amount0: decoded.amount0,
            amount1: decoded.amount1,
        })
    }

    pub fn execute_calldata(fingerprint: Fingerprint) -> Vec<u8> {
        ILiquidityProxy::executePendingInvestmentCall {
            fingerprint: fingerprint.word(),
        }
        .abi_encode()
    }

    pub fn liquidation_calldata(position_id: U256) -> Vec<u8> {
        ILiquidityProxy::executeFullLiquidationCall {
            positionId: position_id,
        }
        .abi_encode()
    }

    pub fn return_calldata(
        position_id: U256,
        base_asset: Address,
        destination: &Bytes,
        min_out0: U256,
        min_out1: U256,
    ) -> Vec<u8> {
        ILiquidityProxy::swapAndReturnCall {
            positionId: position_id,
            baseAsset: base_asset,
            destination: destination.clone(),
            minOut0: min_out0,
            minOut1: min_out1,
            priceLimit: U256::ZERO,
        }
        .abi_encode()
    }

    /// Nudge the proxy to consume received assets and mint the LP
    /// position. Keyed per attempt: the cross-chain message may simply
    /// not have arrived yet, so a later nudge is a genuinely new send.
    /// The proxy itself refuses a fingerprint it already executed.
    pub async fn execute_pending_investment(
        &self,
        fingerprint: Fingerprint,
        attempt: u32,
    ) -> Result<Receipt, ChainError> {
        let calldata = Self::execute_calldata(fingerprint);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: format!("{fingerprint}:execute:{attempt}"),
                plan: TxPlan::new(self.address, calldata),
                description: format!("execute pending investment {fingerprint} attempt {attempt}"),
            })
            .await
    }

    /// Phase 1: burn the position and collect both tokens. Keyed per
    /// attempt because a reverted attempt is followed by a re-quote and
    /// a genuinely new submission.
    pub async fn execute_full_liquidation(
        &self,
        fingerprint: Fingerprint,
        position_id: U256,
        attempt: u32,
    ) -> Result<Receipt, ChainError> {
        let calldata = Self::liquidation_calldata(position_id);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: format!("{fingerprint}:liquidate:{attempt}"),
                plan: TxPlan::new(self.address, calldata),
                description: format!("full liquidation {fingerprint} attempt {attempt}"),
            })
            .await
    }

    /// Phase 2: swap collected tokens to the base asset and send them
    /// back to the hub, bounded by the minimums committed at phase 0.
    #[allow(clippy::too_many_arguments)]
    pub async fn swap_and_return(
        &self,
        fingerprint: Fingerprint,
        position_id: U256,
        base_asset: Address,
        destination: &Bytes,
        min_out0: U256,
        min_out1: U256,
        attempt: u32,
    ) -> Result<Receipt, ChainError> {
        let calldata =
            Self::return_calldata(position_id, base_asset, destination, min_out0, min_out1);
        self.submitter
            .submit(SubmitRequest {
                idempotency_key: format!("{fingerprint}:return:{attempt}"),
                plan: TxPlan::new(self.address, calldata),
                description: format!("swap and return {fingerprint} attempt {attempt}"),
            })
            .await
    }
}

/// Topic0 values the spoke monitor subscribes to.
pub fn spoke_event_topics() -> Vec<B256> {
    vec![
        ILiquidityProxy::PositionExecuted::SIGNATURE_HASH,
        ILiquidityProxy::PositionLiquidated::SIGNATURE_HASH,
        ILiquidityProxy::AssetsReturned::SIGNATURE_HASH,
    ]
}
