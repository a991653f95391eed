use std::future::IntoFuture;
use std::str::FromStr;
use std::time::Duration;

use alloy::consensus::TxReceipt as _;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::json_rpc::ErrorPayload;
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolValue;
use alloy::transports::http::{Client, Http};
use alloy::transports::{RpcError, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use liquidot::ChainId;

use super::{ChainBackend, ChainError, LogRange, RawLog, Receipt, TxPlan};

/// Connection settings for one chain.
#[derive(Clone, Debug)]
pub struct EvmChainConfig {
    pub chain: ChainId,
    pub rpc_url: String,
    /// Deadline applied to every individual RPC.
    pub request_timeout: Duration,
    /// Attempts for transient failures on read paths.
    pub read_retries: usize,
}

/// Chain adapter over a plain JSON-RPC HTTP endpoint.
///
/// One instance per chain, sharing the single operator credential. All
/// reads retry transient failures with exponential backoff and jitter;
/// writes are single-shot because the per-chain writer owns retry and
/// nonce policy.
pub struct EvmChain {
    config: EvmChainConfig,
    provider: RootProvider<Http<Client>>,
    wallet: EthereumWallet,
    operator: Address,
}

impl EvmChain {
    pub fn new(config: EvmChainConfig, operator_key: &str) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(operator_key.trim())
            .context("Operator credential is not a valid private key")?;
        let operator = signer.address();
        let url = config
            .rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL for chain {}: {}", config.chain, config.rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(EvmChain {
            config,
            provider,
            wallet: EthereumWallet::from(signer),
            operator,
        })
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.config.read_retries)
            .with_jitter()
    }

    fn network_error(&self, message: impl ToString) -> ChainError {
        ChainError::Network {
            chain: self.config.chain,
            message: message.to_string(),
        }
    }

    /// Classify a transport error into the shared taxonomy, decoding
    /// standard `Error(string)` revert payloads where present.
    fn classify(&self, err: TransportError) -> ChainError {
        match &err {
            RpcError::ErrorResp(payload) => {
                if let Some(reason) = revert_reason(payload) {
                    return ChainError::SimulationReverted { reason };
                }
                let message = payload.message.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("nonce too low")
                    || lowered.contains("nonce too high")
                    || lowered.contains("already known")
                    || lowered.contains("replacement transaction underpriced")
                {
                    ChainError::NonceConflict {
                        chain: self.config.chain,
                        message,
                    }
                } else if lowered.contains("execution reverted") {
                    ChainError::SimulationReverted { reason: message }
                } else {
                    self.network_error(message)
                }
            }
            _ => self.network_error(&err),
        }
    }

    async fn with_deadline<T, Fut>(&self, fut: Fut) -> Result<T, ChainError>
    where
        Fut: std::future::IntoFuture<Output = Result<T, TransportError>>,
    {
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(self.config.request_timeout, fut.into_future()).await {
            Ok(res) => res.map_err(|e| self.classify(e)),
            Err(_) => Err(ChainError::Timeout {
                chain: self.config.chain,
                elapsed: started.elapsed(),
            }),
        }
    }

    fn call_request(&self, plan: &TxPlan) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.operator)
            .with_to(plan.to)
            .with_input(plan.calldata.clone())
            .with_value(plan.value)
    }
}

#[async_trait]
impl ChainBackend for EvmChain {
    fn chain_id(&self) -> ChainId {
        self.config.chain
    }

    fn operator(&self) -> Address {
        self.operator
    }

    async fn head(&self) -> Result<u64, ChainError> {
        (|| async { self.with_deadline(self.provider.get_block_number()).await })
            .retry(self.backoff())
            .when(ChainError::is_retryable)
            .await
    }

    async fn call_view(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.operator)
            .with_to(to)
            .with_input(calldata);
        (|| async { self.with_deadline(self.provider.call(&tx)).await })
            .retry(self.backoff())
            .when(ChainError::is_retryable)
            .await
    }

    async fn get_logs(&self, range: &LogRange) -> Result<Vec<RawLog>, ChainError> {
        let mut filter = Filter::new()
            .address(range.contract)
            .from_block(range.from_block)
            .to_block(range.to_block);
        if !range.topics.is_empty() {
            filter = filter.event_signature(range.topics.clone());
        }
        let logs = (|| async { self.with_deadline(self.provider.get_logs(&filter)).await })
            .retry(self.backoff())
            .when(ChainError::is_retryable)
            .await?;
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            out.push(RawLog {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number: log
                    .block_number
                    .ok_or_else(|| self.network_error("log without block number"))?,
                tx_hash: log
                    .transaction_hash
                    .ok_or_else(|| self.network_error("log without transaction hash"))?,
                log_index: log.log_index.unwrap_or_default(),
            });
        }
        out.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(out)
    }

    async fn simulate(&self, plan: &TxPlan) -> Result<(), ChainError> {
        let tx = self.call_request(plan);
        self.with_deadline(self.provider.call(&tx)).await.map(|_| ())
    }

    async fn transaction_count(&self) -> Result<u64, ChainError> {
        (|| async {
            self.with_deadline(self.provider.get_transaction_count(self.operator))
                .await
        })
        .retry(self.backoff())
        .when(ChainError::is_retryable)
        .await
    }

    async fn submit(&self, plan: &TxPlan, nonce: u64) -> Result<B256, ChainError> {
        let mut tx = self
            .call_request(plan)
            .with_nonce(nonce)
            .with_chain_id(self.config.chain.u64());
        let fees = self
            .with_deadline(self.provider.estimate_eip1559_fees(None))
            .await?;
        let gas = self.with_deadline(self.provider.estimate_gas(&tx)).await?;
        tx = tx
            .with_gas_limit(gas.saturating_mul(12) / 10)
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| self.network_error(format!("failed to sign transaction: {e}")))?;
        let tx_hash = *envelope.tx_hash();
        self.with_deadline(self.provider.send_tx_envelope(envelope))
            .await?;
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError> {
        let receipt = (|| async {
            self.with_deadline(self.provider.get_transaction_receipt(tx_hash))
                .await
        })
        .retry(self.backoff())
        .when(ChainError::is_retryable)
        .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let block_number = receipt
            .block_number
            .ok_or_else(|| self.network_error("receipt without block number"))?;
        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| RawLog {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number,
                tx_hash,
                log_index: log.log_index.unwrap_or_default(),
            })
            .collect();
        Ok(Some(Receipt {
            tx_hash,
            block_number,
            success: receipt.status(),
            logs,
        }))
    }

    async fn native_balance(&self, address: Address) -> Result<U256, ChainError> {
        (|| async { self.with_deadline(self.provider.get_balance(address)).await })
            .retry(self.backoff())
            .when(ChainError::is_retryable)
            .await
    }

    async fn runtime_version(&self) -> Result<String, ChainError> {
        self.with_deadline(
            self.provider
                .raw_request::<_, String>("web3_clientVersion".into(), ()),
        )
        .await
    }
}

/// Decode the standard `Error(string)` revert payload carried in a
/// JSON-RPC error response, if any.
fn revert_reason(payload: &ErrorPayload) -> Option<String> {
    const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
    let raw = payload.data.as_ref()?;
    let data: String = serde_json::from_str(raw.get()).ok()?;
    let bytes = hex::decode(data.strip_prefix("0x")?).ok()?;
    if bytes.len() < 4 || bytes[0..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    <String as SolValue>::abi_decode(&bytes[4..], false).ok()
}
