use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use liquidot_orchestrator::pools::PoolSource;

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder};

struct IngestPools {
    sources: Vec<PoolSource>,
}

impl AppBuilder {
    pub(super) fn start_ingest(&mut self) -> Result<()> {
        let sources = self
            .app
            .spokes
            .values()
            .map(|spoke| {
                PoolSource::new(
                    self.app.client.clone(),
                    spoke.setup.pool_source_url.clone(),
                    self.app.config.pool_credential.clone(),
                    spoke.setup.chain_id,
                    self.app.config.pool_source.page_size,
                )
            })
            .collect();
        self.watch_periodic(TaskLabel::IngestPools, IngestPools { sources })
    }
}

#[async_trait]
impl WatchedTask for IngestPools {
    async fn run_single(
        &mut self,
        app: Arc<App>,
        heartbeat: Heartbeat,
    ) -> Result<WatchedTaskOutput> {
        let mut messages = Vec::new();
        for source in &self.sources {
            // An unreachable analytics source degrades freshness; it
            // must never stop the other spokes or the rest of the
            // system.
            match source.fetch().await {
                Ok(snapshots) => {
                    let mut seen = HashSet::new();
                    for snapshot in &snapshots {
                        seen.insert(snapshot.id.address);
                        app.db.upsert_pool(snapshot).await?;
                    }
                    let deleted = app
                        .db
                        .age_missing_pools(
                            source.chain(),
                            &seen,
                            app.config.pool_source.max_missed_cycles,
                        )
                        .await?;
                    messages.push(format!(
                        "chain {}: {} pools refreshed, {} soft-deleted",
                        source.chain(),
                        snapshots.len(),
                        deleted
                    ));
                }
                Err(err) => {
                    tracing::warn!(
                        "Pool ingestion failed for chain {}: {err:?}; previous snapshot stays authoritative",
                        source.chain()
                    );
                    messages.push(format!("chain {}: ingestion failed ({err})", source.chain()));
                }
            }
            heartbeat.reset_too_old();
        }
        Ok(WatchedTaskOutput::new(messages.join("; ")))
    }
}
