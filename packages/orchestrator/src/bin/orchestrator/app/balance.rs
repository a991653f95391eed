use std::sync::Arc;

use alloy::primitives::U256;
use anyhow::Result;
use async_trait::async_trait;
use liquidot::ChainId;
use liquidot_orchestrator::chain::DynChain;

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder};

/// Watches the operator's native balance on one chain and raises the
/// status endpoint once it dips under the configured minimum.
struct OperatorBalance {
    chain_id: ChainId,
    minimum: U256,
}

impl AppBuilder {
    pub(super) fn start_operator_balance(&mut self) -> Result<()> {
        let mut targets = vec![(
            self.app.config.hub.chain_id,
            self.app.config.hub.min_operator_balance,
        )];
        for spoke in self.app.spokes.values() {
            targets.push((spoke.setup.chain_id, spoke.setup.min_operator_balance));
        }
        for (chain_id, minimum) in targets {
            self.watch_periodic(
                TaskLabel::OperatorBalance { chain: chain_id },
                OperatorBalance { chain_id, minimum },
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl WatchedTask for OperatorBalance {
    async fn run_single(&mut self, app: Arc<App>, _: Heartbeat) -> Result<WatchedTaskOutput> {
        let backend: &DynChain = if self.chain_id == app.config.hub.chain_id {
            &app.hub.chain
        } else {
            &app.spoke(self.chain_id)?.chain
        };
        let operator = backend.operator();
        let balance = backend.native_balance(operator).await?;
        anyhow::ensure!(
            balance >= self.minimum,
            "Operator {operator} has {balance} on chain {}, below the minimum {}",
            self.chain_id,
            self.minimum
        );
        Ok(WatchedTaskOutput::new(format!(
            "operator {operator} holds {balance}"
        )))
    }
}
