//! Scriptable in-memory chain backend for driving the lifecycle engine
//! without RPC. Views and transactions are scripted per function
//! selector; every submission is recorded for assertions.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, LogData, B256, U256};
use async_trait::async_trait;
use liquidot::prelude::*;
use liquidot_orchestrator::chain::{
    spawn_submitter, ChainBackend, ChainError, ChainSubmitter, LogRange, RawLog, Receipt,
    SubmitterConfig, TxPlan,
};
use liquidot_orchestrator::db::Db;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Outcome of the next transaction hitting a given selector.
#[derive(Clone, Default)]
pub struct TxScript {
    pub revert_on_chain: bool,
    /// Events the transaction emits: (emitting contract, log payload).
    pub logs: Vec<(Address, LogData)>,
}

#[derive(Default)]
struct MockState {
    head: u64,
    next_nonce: u64,
    /// One-shot view results per selector; strings become reverts.
    view_queue: HashMap<[u8; 4], Vec<Result<Vec<u8>, String>>>,
    /// Fallback view results, reused indefinitely.
    view_default: HashMap<[u8; 4], Vec<u8>>,
    /// One-shot simulation reverts per selector.
    sim_reverts: HashMap<[u8; 4], Vec<String>>,
    /// One-shot transaction scripts per selector.
    tx_queue: HashMap<[u8; 4], Vec<TxScript>>,
    /// Every broadcast transaction, in order.
    submissions: Vec<(Address, Bytes, u64)>,
    receipts: HashMap<B256, Receipt>,
    chain_logs: Vec<RawLog>,
}

pub struct MockChain {
    chain: ChainId,
    operator: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain: u64) -> Arc<Self> {
        Arc::new(MockChain {
            chain: ChainId::new(chain),
            operator: Address::repeat_byte(0x0f),
            state: Mutex::new(MockState {
                head: 100,
                ..MockState::default()
            }),
        })
    }

    pub fn set_view(&self, selector: [u8; 4], data: Vec<u8>) {
        self.state.lock().view_default.insert(selector, data);
    }

    pub fn push_view(&self, selector: [u8; 4], result: Result<Vec<u8>, &str>) {
        self.state
            .lock()
            .view_queue
            .entry(selector)
            .or_default()
            .push(result.map_err(|e| e.to_owned()));
    }

    pub fn push_sim_revert(&self, selector: [u8; 4], reason: &str) {
        self.state
            .lock()
            .sim_reverts
            .entry(selector)
            .or_default()
            .push(reason.to_owned());
    }

    pub fn push_tx(&self, selector: [u8; 4], script: TxScript) {
        self.state
            .lock()
            .tx_queue
            .entry(selector)
            .or_default()
            .push(script);
    }

    /// Append an event directly to the chain log, as if some other actor
    /// emitted it.
    pub fn emit(&self, address: Address, data: LogData) {
        let mut state = self.state.lock();
        state.head += 1;
        let log = raw_log_at(address, &data, state.head, B256::repeat_byte(0xee), 0);
        state.chain_logs.push(log);
    }

    /// Number of broadcast transactions whose calldata starts with the
    /// selector.
    pub fn submission_count(&self, selector: [u8; 4]) -> usize {
        self.state
            .lock()
            .submissions
            .iter()
            .filter(|(_, calldata, _)| calldata.len() >= 4 && calldata[0..4] == selector)
            .count()
    }

    fn selector(plan: &TxPlan) -> [u8; 4] {
        let mut selector = [0u8; 4];
        if plan.calldata.len() >= 4 {
            selector.copy_from_slice(&plan.calldata[0..4]);
        }
        selector
    }
}

fn raw_log_at(
    address: Address,
    data: &LogData,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> RawLog {
    RawLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number,
        tx_hash,
        log_index,
    }
}

/// Build a standalone RawLog from an encoded event, for feeding the
/// monitor handlers directly.
pub fn raw_log(address: Address, data: LogData) -> RawLog {
    raw_log_at(address, &data, 1, B256::repeat_byte(0xcd), 0)
}

#[async_trait]
impl ChainBackend for MockChain {
    fn chain_id(&self) -> ChainId {
        self.chain
    }

    fn operator(&self) -> Address {
        self.operator
    }

    async fn head(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().head)
    }

    async fn call_view(&self, _to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let mut selector = [0u8; 4];
        if calldata.len() >= 4 {
            selector.copy_from_slice(&calldata[0..4]);
        }
        let mut state = self.state.lock();
        if let Some(queue) = state.view_queue.get_mut(&selector) {
            if !queue.is_empty() {
                return match queue.remove(0) {
                    Ok(data) => Ok(data.into()),
                    Err(reason) => Err(ChainError::SimulationReverted { reason }),
                };
            }
        }
        state
            .view_default
            .get(&selector)
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| ChainError::SimulationReverted {
                reason: format!("unscripted view {selector:02x?}"),
            })
    }

    async fn get_logs(&self, range: &LogRange) -> Result<Vec<RawLog>, ChainError> {
        let state = self.state.lock();
        Ok(state
            .chain_logs
            .iter()
            .filter(|log| {
                log.address == range.contract
                    && log.block_number >= range.from_block
                    && log.block_number <= range.to_block
                    && (range.topics.is_empty()
                        || log
                            .topics
                            .first()
                            .is_some_and(|topic| range.topics.contains(topic)))
            })
            .cloned()
            .collect())
    }

    async fn simulate(&self, plan: &TxPlan) -> Result<(), ChainError> {
        let selector = Self::selector(plan);
        let mut state = self.state.lock();
        if let Some(reverts) = state.sim_reverts.get_mut(&selector) {
            if !reverts.is_empty() {
                let reason = reverts.remove(0);
                return Err(ChainError::SimulationReverted { reason });
            }
        }
        Ok(())
    }

    async fn transaction_count(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().next_nonce)
    }

    async fn submit(&self, plan: &TxPlan, nonce: u64) -> Result<B256, ChainError> {
        let selector = Self::selector(plan);
        let mut state = self.state.lock();
        if nonce != state.next_nonce {
            return Err(ChainError::NonceConflict {
                chain: self.chain,
                message: format!("expected {}, got {nonce}", state.next_nonce),
            });
        }
        state.next_nonce += 1;
        state.head += 1;
        let block_number = state.head;
        let mut preimage = plan.calldata.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&self.chain.u64().to_be_bytes());
        let tx_hash = keccak256(&preimage);
        state
            .submissions
            .push((plan.to, plan.calldata.clone(), nonce));
        let script = state
            .tx_queue
            .get_mut(&selector)
            .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)))
            .unwrap_or_default();
        let logs: Vec<RawLog> = script
            .logs
            .iter()
            .enumerate()
            .map(|(index, (address, data))| {
                raw_log_at(
                    *address,
                    data,
                    block_number,
                    tx_hash,
                    u64::try_from(index).unwrap(),
                )
            })
            .collect();
        if script.revert_on_chain {
            state.receipts.insert(
                tx_hash,
                Receipt {
                    tx_hash,
                    block_number,
                    success: false,
                    logs: Vec::new(),
                },
            );
        } else {
            state.chain_logs.extend(logs.iter().cloned());
            state.receipts.insert(
                tx_hash,
                Receipt {
                    tx_hash,
                    block_number,
                    success: true,
                    logs,
                },
            );
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state.lock().receipts.get(&tx_hash).cloned())
    }

    async fn native_balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::from(1_000_000_000_000_000_000u64))
    }

    async fn runtime_version(&self) -> Result<String, ChainError> {
        Ok(format!("mock/{}", self.chain))
    }
}

/// Wire a mock chain to a live writer task.
pub fn submitter_for(chain: &Arc<MockChain>) -> ChainSubmitter {
    spawn_submitter(
        chain.clone(),
        SubmitterConfig {
            inclusion_deadline: std::time::Duration::from_secs(5),
            ..SubmitterConfig::default()
        },
        [],
        CancellationToken::new(),
    )
}

pub async fn memory_db() -> Db {
    Db::connect("sqlite::memory:").await.unwrap()
}

/// Preferences used across the scenario tests: 100bps slippage, -10%
/// stop loss, +20% take profit, half the balance per pool.
pub fn test_preferences(base_asset: Address) -> Preferences {
    Preferences {
        min_apr_bps: 0,
        max_allocation_bps: BasisPoints::new(5000),
        base_assets: vec![base_asset],
        risk_level: 3,
        stop_loss_bps: BasisPoints::new(-1000),
        take_profit_bps: BasisPoints::new(2000),
        slippage_bps: BasisPoints::new(100),
    }
}
