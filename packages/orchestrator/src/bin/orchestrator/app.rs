mod balance;
mod decide;
mod dispatch;
mod ingest;
mod liquidate;
pub(crate) mod manifest;
mod monitor;
mod nudge;
pub(crate) mod queue;
mod range_watch;
mod types;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub(crate) use types::*;

use liquidot_orchestrator::config::Environment;

impl AppBuilder {
    pub(crate) async fn start(mut self, listener: TcpListener) -> Result<()> {
        self.verify_runtime_assumptions().await?;

        self.start_ingest()?;
        self.start_decide()?;
        self.start_dispatch()?;
        self.start_execution_nudge()?;
        self.start_monitors()?;
        self.start_range_watch()?;
        self.start_liquidators()?;
        self.start_operator_balance()?;
        self.start_rest_api(listener);

        crate::watcher::spawn_shutdown_listener(self.cancel.clone());

        // Start waiting on all tasks. The watcher returns when every
        // task has drained after cancellation, or as soon as one fails
        // hard.
        let app = self.app.clone();
        self.watcher.wait(&app).await
    }

    /// Check the manifest-backed claims that are cheap to verify before
    /// any task runs: every configured spoke must be registered with the
    /// vault. A mismatch is a deployment problem, not something retries
    /// can fix.
    async fn verify_runtime_assumptions(&self) -> Result<()> {
        for spoke in self.app.spokes.values() {
            let chain_id = spoke.setup.chain_id;
            match self.app.hub.vault.supported_chains(chain_id.u64()).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(liquidot_orchestrator::chain::ChainError::RuntimeAssumption {
                        chain: chain_id,
                        claim: format!("hub vault lists spoke chain {chain_id} as supported"),
                    }
                    .into());
                }
                Err(err) if self.app.config.environment == Environment::Dev => {
                    // A dev hub may not be deployed yet; keep going but
                    // make it visible.
                    tracing::warn!(
                        "Cannot verify spoke {chain_id} against the vault (dev): {err}"
                    );
                }
                Err(err) => {
                    return Err(err)
                        .map_err(anyhow::Error::from)
                        .context(format!("Cannot verify spoke {chain_id} against the vault"));
                }
            }
        }
        Ok(())
    }
}
