use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Bytes;
use anyhow::Result;
use async_trait::async_trait;
use liquidot::{Fingerprint, InvestmentIntent};
use liquidot_orchestrator::contracts::ProxyContract;
use liquidot_orchestrator::engine::{self, DispatchOutcome};

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::queue::Receiver;
use super::{App, AppBuilder};

/// How long a worker parks waiting for new intents before reporting an
/// idle run.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

struct DispatchWorker {
    recv: Receiver<Fingerprint, InvestmentIntent>,
}

impl AppBuilder {
    pub(super) fn start_dispatch(&mut self) -> Result<()> {
        let worker = DispatchWorker {
            recv: self.dispatch_recv.clone(),
        };
        self.watch_periodic(TaskLabel::Dispatch, worker)
    }
}

#[async_trait]
impl WatchedTask for DispatchWorker {
    async fn run_single(&mut self, app: Arc<App>, _: Heartbeat) -> Result<WatchedTaskOutput> {
        if app.is_paused() {
            return Ok(WatchedTaskOutput::new(
                "Vault is paused; dispatch suppressed",
            ));
        }
        let Some(item) = self.recv.receive_with_timeout(RECEIVE_TIMEOUT).await else {
            return Ok(WatchedTaskOutput::new("No dispatch work needed").suppress());
        };
        let intent = item.value;
        let spoke = app.spoke(intent.chain)?;
        // In test mode the hub skips the real cross-chain send, so no
        // pre-built message is attached and the spoke is nudged
        // directly below.
        let cross_chain_message: Bytes = if app.config.test_mode {
            Bytes::new()
        } else {
            ProxyContract::execute_calldata(intent.fingerprint).into()
        };
        let outcome = engine::dispatch_intent(
            &app.db,
            &app.hub.vault,
            &intent,
            &spoke.setup.destination_location,
            &cross_chain_message,
        )
        .await?;
        let message = match outcome {
            DispatchOutcome::Dispatched => {
                if app.config.test_mode {
                    super::nudge::nudge_execution(&app, spoke, intent.fingerprint).await?;
                }
                format!("Dispatched investment {}", intent.fingerprint)
            }
            DispatchOutcome::AlreadyInFlight { status } => format!(
                "Investment {} already in flight ({status})",
                intent.fingerprint
            ),
            DispatchOutcome::Cancelled { reason } => format!(
                "Investment {} cancelled by the hub: {reason}",
                intent.fingerprint
            ),
        };
        Ok(WatchedTaskOutput::new(message).skip_delay())
    }
}
