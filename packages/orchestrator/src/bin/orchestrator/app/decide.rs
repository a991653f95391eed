use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use liquidot_orchestrator::engine;

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder};

struct Decide;

impl AppBuilder {
    pub(super) fn start_decide(&mut self) -> Result<()> {
        self.watch_periodic(TaskLabel::Decide, Decide)
    }
}

#[async_trait]
impl WatchedTask for Decide {
    async fn run_single(
        &mut self,
        app: Arc<App>,
        heartbeat: Heartbeat,
    ) -> Result<WatchedTaskOutput> {
        let freshness = chrono::Duration::seconds(
            app.config.pool_source.freshness_secs.try_into()?,
        );
        let mut intents = 0usize;
        let mut liquidations = 0usize;
        let mut notes = Vec::new();
        // The store is the roster authority; the config seed was synced
        // into it at startup.
        for user in app.db.list_users().await? {
            let evaluation = engine::evaluate_user(
                &app.db,
                &app.hub.vault,
                &app.config.decision,
                freshness,
                &user,
            )
            .await?;
            for intent in evaluation.intents {
                if app.dispatch_trigger.push(intent.fingerprint, intent) {
                    intents += 1;
                }
            }
            for request in evaluation.liquidations {
                if app
                    .liquidation_trigger
                    .push(request.fingerprint, request.reason)
                {
                    liquidations += 1;
                }
            }
            notes.extend(evaluation.notes);
            heartbeat.reset_too_old();
        }
        let mut message = format!(
            "queued {intents} investment intent(s), {liquidations} liquidation trigger(s)"
        );
        if !notes.is_empty() {
            message.push_str(": ");
            message.push_str(&notes.join("; "));
        }
        Ok(WatchedTaskOutput::new(message))
    }
}
