use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use liquidot::{Fingerprint, PositionStatus};
use liquidot_orchestrator::engine::{
    self, LiquidationOutcome, LiquidationReason, LiquidationSettings,
};

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::queue::Receiver;
use super::{App, AppBuilder};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

struct LiquidationWorker {
    recv: Receiver<Fingerprint, LiquidationReason>,
}

impl AppBuilder {
    pub(super) fn start_liquidators(&mut self) -> Result<()> {
        for index in 1..=self.app.config.liquidation.workers.max(1) {
            let worker = LiquidationWorker {
                recv: self.liquidation_recv.clone(),
            };
            self.watch_periodic(TaskLabel::Liquidate { index }, worker)?;
        }
        Ok(())
    }
}

#[async_trait]
impl WatchedTask for LiquidationWorker {
    async fn run_single(&mut self, app: Arc<App>, _: Heartbeat) -> Result<WatchedTaskOutput> {
        let Some(item) = self.recv.receive_with_timeout(RECEIVE_TIMEOUT).await else {
            // Idle: look for liquidations interrupted by a restart or a
            // failed phase and queue them for another pass.
            let requeued = requeue_stuck(&app).await?;
            return Ok(if requeued > 0 {
                WatchedTaskOutput::new(format!("requeued {requeued} interrupted liquidation(s)"))
                    .skip_delay()
            } else {
                WatchedTaskOutput::new("No liquidation work needed").suppress()
            });
        };
        let fingerprint = item.key;
        let reason = item.value;
        let position = app
            .db
            .get_position(fingerprint)
            .await?
            .with_context(|| format!("Liquidation queued for unknown position {fingerprint}"))?;
        let spoke = app.spoke(position.chain)?;
        let slippage = app
            .db
            .list_users()
            .await?
            .into_iter()
            .find(|user| user.address == position.user)
            .map(|user| user.preferences.slippage_bps)
            .with_context(|| format!("No preferences for user {}", position.user))?;
        let settings = LiquidationSettings {
            slippage,
            absolute_minimum: app.config.absolute_minimum,
            retry_bound: app.config.liquidation.retry_bound,
            phase_deadline: Duration::from_secs(app.config.liquidation.phase_deadline_secs),
            destination: app.config.hub.return_location.clone(),
        };
        let outcome = engine::run_liquidation(
            &app.db,
            &spoke.proxy,
            &app.hub.vault,
            fingerprint,
            &settings,
            reason,
        )
        .await?;
        let message = match outcome {
            LiquidationOutcome::Settled { amount } => {
                app.clear_quote_halt(fingerprint);
                format!("Position {fingerprint} settled for {amount}")
            }
            LiquidationOutcome::QuoteHalted { reason } => {
                let attempts = app.record_quote_halt(fingerprint, reason.clone());
                if attempts > app.config.liquidation.retry_bound {
                    app.db
                        .fail_position(
                            fingerprint,
                            &format!("quote halted {attempts} times, last: {reason}"),
                        )
                        .await?;
                    format!("Position {fingerprint} halted after {attempts} failed quotes")
                } else {
                    format!(
                        "Quote halted for {fingerprint} (attempt {attempts}): {reason}; position stays active"
                    )
                }
            }
            LiquidationOutcome::PhaseFailed { phase, reason } => {
                // Leave the position where it is; the monitor or the
                // idle requeue brings it back for the next cycle.
                format!("Liquidation phase '{phase}' failed for {fingerprint}: {reason}")
            }
            LiquidationOutcome::Halted { reason } => {
                format!("Position {fingerprint} handed to the operator: {reason}")
            }
            LiquidationOutcome::NotEligible { status } => {
                format!("Position {fingerprint} not eligible for liquidation ({status})")
            }
        };
        Ok(WatchedTaskOutput::new(message).skip_delay())
    }
}

/// Queue positions stranded mid-liquidation. Dedup in the trigger keeps
/// this cheap to call repeatedly.
async fn requeue_stuck(app: &App) -> Result<usize> {
    let mut requeued = 0usize;
    for status in [PositionStatus::LiquidationPending, PositionStatus::Liquidated] {
        for position in app.db.positions_with_status(status).await? {
            if app
                .liquidation_trigger
                .push(position.fingerprint, LiquidationReason::Recovery)
            {
                requeued += 1;
            }
        }
    }
    Ok(requeued)
}
