//! Per-chain transaction writer.
//!
//! One writer task per chain is the sole consumer of the operator nonce on
//! that chain. Every other component enqueues a [`SubmitRequest`] and
//! awaits the outcome; business logic never touches nonces or signing.
//! Requests carry an idempotency key: a key the writer has already
//! broadcast resolves to the original transaction rather than a second
//! send, which is what makes retried dispatch and settle calls safe.

use std::collections::HashMap;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use liquidot::ChainId;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{ChainBackend, ChainError, DynChain, Receipt, TxPlan};

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    /// Queue depth before senders start waiting.
    pub queue_depth: usize,
    /// Deadline for a submitted transaction to be included.
    pub inclusion_deadline: Duration,
    /// Attempts for transient failures around a single broadcast.
    pub submit_retries: usize,
    /// How long the writer keeps draining after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        SubmitterConfig {
            queue_depth: 64,
            inclusion_deadline: Duration::from_secs(120),
            submit_retries: 5,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// A signed-submission request, keyed for idempotency.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    /// Caller-supplied key. Two requests with the same key are the same
    /// logical action; only the first ever reaches the wire.
    pub idempotency_key: String,
    pub plan: TxPlan,
    /// Human-readable label for logs and diagnostics.
    pub description: String,
}

struct Queued {
    req: SubmitRequest,
    resp: oneshot::Sender<Result<Receipt, ChainError>>,
}

/// Cheap cloneable handle used by components to submit through the
/// per-chain writer.
#[derive(Clone)]
pub struct ChainSubmitter {
    chain: ChainId,
    send: async_channel::Sender<Queued>,
}

impl ChainSubmitter {
    /// Enqueue and await inclusion. Serialized with every other write on
    /// this chain.
    pub async fn submit(&self, req: SubmitRequest) -> Result<Receipt, ChainError> {
        let (resp, rx) = oneshot::channel();
        self.send
            .send(Queued { req, resp })
            .await
            .map_err(|_| ChainError::WriterClosed { chain: self.chain })?;
        rx.await
            .map_err(|_| ChainError::WriterClosed { chain: self.chain })?
    }
}

/// The writer task state. Owned by exactly one tokio task per chain.
struct Writer {
    backend: DynChain,
    config: SubmitterConfig,
    recv: async_channel::Receiver<Queued>,
    /// Next nonce to assign; `None` until the first resync.
    next_nonce: Option<u64>,
    /// Idempotency key -> broadcast transaction hash.
    broadcast: HashMap<String, alloy::primitives::B256>,
}

/// Spawn the writer task for a chain. Returns the submit handle; the
/// task exits once `cancel` fires and the in-flight request has drained.
///
/// `seeds` replays (idempotency key, tx hash) pairs recovered from the
/// operation log so a restart never re-sends a transaction that already
/// went out.
pub fn spawn_submitter(
    backend: DynChain,
    config: SubmitterConfig,
    seeds: impl IntoIterator<Item = (String, alloy::primitives::B256)>,
    cancel: CancellationToken,
) -> ChainSubmitter {
    let (send, recv) = async_channel::bounded(config.queue_depth);
    let chain = backend.chain_id();
    let mut writer = Writer {
        backend,
        config,
        recv,
        next_nonce: None,
        broadcast: seeds.into_iter().collect(),
    };
    tokio::spawn(async move {
        writer.run(cancel).await;
        tracing::info!("Chain {chain} writer exited");
    });
    ChainSubmitter { chain, send }
}

impl Writer {
    async fn run(&mut self, cancel: CancellationToken) {
        loop {
            let queued = tokio::select! {
                _ = cancel.cancelled() => break,
                queued = self.recv.recv() => match queued {
                    Ok(queued) => queued,
                    Err(_) => break,
                },
            };
            let outcome = tokio::time::timeout(
                self.config.inclusion_deadline + self.config.shutdown_grace,
                self.handle(&queued.req),
            )
            .await
            .unwrap_or(Err(ChainError::Timeout {
                chain: self.backend.chain_id(),
                elapsed: self.config.inclusion_deadline,
            }));
            if let Err(err) = &outcome {
                tracing::warn!(
                    "Chain {} submission '{}' failed: {err}",
                    self.backend.chain_id(),
                    queued.req.description
                );
            }
            // Receiver may have given up; nothing to do then.
            let _ = queued.resp.send(outcome);
        }
    }

    async fn handle(&mut self, req: &SubmitRequest) -> Result<Receipt, ChainError> {
        // A key we already broadcast resolves to the original submission.
        if let Some(tx_hash) = self.broadcast.get(&req.idempotency_key).copied() {
            tracing::debug!(
                "Duplicate submission '{}' ({}), returning original transaction {tx_hash}",
                req.description,
                req.idempotency_key
            );
            return self.finish(tx_hash).await;
        }

        // Simulate first so a reverting call never consumes a nonce.
        (|| async { self.backend.simulate(&req.plan).await })
            .retry(self.retry_policy())
            .when(|e: &ChainError| {
                matches!(e, ChainError::Network { .. } | ChainError::Timeout { .. })
            })
            .await?;

        let tx_hash = self.send_with_nonce(req).await?;
        self.broadcast.insert(req.idempotency_key.clone(), tx_hash);
        self.finish(tx_hash).await
    }

    async fn send_with_nonce(
        &mut self,
        req: &SubmitRequest,
    ) -> Result<alloy::primitives::B256, ChainError> {
        let mut nonce_refreshed = false;
        let mut attempts = 0;
        loop {
            let nonce = match self.next_nonce {
                Some(nonce) => nonce,
                None => {
                    let nonce = self.backend.transaction_count().await?;
                    self.next_nonce = Some(nonce);
                    nonce
                }
            };
            match self.backend.submit(&req.plan, nonce).await {
                Ok(tx_hash) => {
                    self.next_nonce = Some(nonce + 1);
                    return Ok(tx_hash);
                }
                Err(ChainError::NonceConflict { chain, message }) => {
                    if nonce_refreshed {
                        return Err(ChainError::NonceConflict { chain, message });
                    }
                    tracing::warn!("Nonce conflict on chain {chain}, resyncing: {message}");
                    nonce_refreshed = true;
                    self.next_nonce = None;
                }
                Err(err) if err.is_retryable() && attempts < self.config.submit_retries => {
                    attempts += 1;
                    let delay = Duration::from_millis(250 * (1 << attempts.min(5)));
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn finish(&self, tx_hash: alloy::primitives::B256) -> Result<Receipt, ChainError> {
        let receipt = self
            .backend
            .await_receipt(tx_hash, self.config.inclusion_deadline)
            .await?;
        if receipt.success {
            Ok(receipt)
        } else {
            Err(ChainError::IncludedReverted { tx_hash })
        }
    }

    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.config.submit_retries)
            .with_jitter()
    }
}
