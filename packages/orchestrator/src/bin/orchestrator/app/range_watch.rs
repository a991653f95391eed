use std::sync::Arc;

use alloy::primitives::U256;
use anyhow::Result;
use async_trait::async_trait;
use liquidot::PositionStatus;
use liquidot_orchestrator::engine::LiquidationReason;

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder};

/// Polls `isPositionOutOfRange` for every Active position. There is no
/// on-chain event for a range exit, so this is the detection path that
/// feeds the liquidation controller.
struct RangeWatch;

impl AppBuilder {
    pub(super) fn start_range_watch(&mut self) -> Result<()> {
        self.watch_periodic(TaskLabel::RangeWatch, RangeWatch)
    }
}

#[async_trait]
impl WatchedTask for RangeWatch {
    async fn run_single(
        &mut self,
        app: Arc<App>,
        heartbeat: Heartbeat,
    ) -> Result<WatchedTaskOutput> {
        let active = app.db.positions_with_status(PositionStatus::Active).await?;
        let total = active.len();
        let mut exited = 0usize;
        for position in active {
            let Some(nft_id) = position.nft_id else {
                continue;
            };
            let spoke = app.spoke(position.chain)?;
            let out_of_range = spoke
                .proxy
                .is_position_out_of_range(U256::from(nft_id))
                .await?;
            if out_of_range
                && app
                    .liquidation_trigger
                    .push(position.fingerprint, LiquidationReason::RangeExit)
            {
                tracing::info!(
                    "Position {} left its range; liquidation queued",
                    position.fingerprint
                );
                exited += 1;
            }
            heartbeat.reset_too_old();
        }
        Ok(WatchedTaskOutput::new(format!(
            "checked {total} active position(s), {exited} range exit(s) queued"
        )))
    }
}
