use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use liquidot::{Fingerprint, PositionStatus};
use liquidot_orchestrator::contracts::ProxyContract;
use liquidot_orchestrator::db::{
    payload_digest, OperationPhase, OperationRecord, OperationStatus,
};

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder, SpokeHandle};

/// Positions sitting in PendingExecution longer than this get the spoke
/// nudged again; covers a dropped or slow cross-chain message.
const NUDGE_AFTER_SECS: i64 = 300;

struct ExecutionNudge;

impl AppBuilder {
    pub(super) fn start_execution_nudge(&mut self) -> Result<()> {
        self.watch_periodic(TaskLabel::ExecutionNudge, ExecutionNudge)
    }
}

/// Ask the spoke to consume received assets and mint, logging the
/// attempt. Shared by the nudge task and the test-mode dispatch path.
pub(super) async fn nudge_execution(
    app: &App,
    spoke: &SpokeHandle,
    fingerprint: Fingerprint,
) -> Result<bool> {
    let attempt = app
        .db
        .oplog_attempts(fingerprint, OperationPhase::Execute)
        .await?
        + 1;
    if attempt > app.config.liquidation.retry_bound {
        app.db
            .fail_position(fingerprint, "execution nudges exhausted")
            .await?;
        return Ok(false);
    }
    let key = format!("{fingerprint}:execute:{attempt}");
    app.db
        .oplog_append(&OperationRecord {
            fingerprint,
            phase: OperationPhase::Execute,
            attempt,
            idempotency_key: key.clone(),
            payload_digest: payload_digest(&ProxyContract::execute_calldata(fingerprint)),
            chain: spoke.setup.chain_id,
            tx_hash: None,
            status: OperationStatus::Submitted,
        })
        .await?;
    match spoke
        .proxy
        .execute_pending_investment(fingerprint, attempt)
        .await
    {
        Ok(receipt) => {
            app.db
                .oplog_update(&key, Some(receipt.tx_hash), OperationStatus::Confirmed)
                .await?;
            Ok(true)
        }
        Err(err) => {
            app.db
                .oplog_update(&key, None, OperationStatus::Failed)
                .await?;
            tracing::warn!("Execution nudge for {fingerprint} failed: {err}");
            Ok(false)
        }
    }
}

#[async_trait]
impl WatchedTask for ExecutionNudge {
    async fn run_single(
        &mut self,
        app: Arc<App>,
        heartbeat: Heartbeat,
    ) -> Result<WatchedTaskOutput> {
        let stuck = app
            .db
            .positions_with_status(PositionStatus::PendingExecution)
            .await?;
        let mut nudged = 0usize;
        for position in stuck {
            let age = Utc::now().signed_duration_since(position.updated_at);
            if age.num_seconds() < NUDGE_AFTER_SECS {
                continue;
            }
            let spoke = app.spoke(position.chain)?;
            if nudge_execution(&app, spoke, position.fingerprint).await? {
                nudged += 1;
            }
            heartbeat.reset_too_old();
        }
        Ok(WatchedTaskOutput::new(format!(
            "nudged {nudged} pending execution(s)"
        )))
    }
}
