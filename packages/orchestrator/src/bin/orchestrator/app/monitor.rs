use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use liquidot::ChainId;
use liquidot_orchestrator::chain::EventTail;
use liquidot_orchestrator::contracts::{hub_event_topics, spoke_event_topics};
use liquidot_orchestrator::engine::{self, HubEffect, LiquidationReason, SpokeEffect};

use crate::watcher::{Heartbeat, TaskLabel, WatchedTask, WatchedTaskOutput};

use super::{App, AppBuilder};

enum MonitorTarget {
    Hub,
    Spoke { chain: ChainId },
}

/// Long-running event tailer for one contract, resuming from the cursor
/// persisted in the store. The cursor only advances after every event in
/// a page is handled, so a crash mid-page re-delivers; every handler is
/// CAS-idempotent.
struct Monitor {
    target: MonitorTarget,
    tail: EventTail,
}

impl AppBuilder {
    pub(super) fn start_monitors(&mut self) -> Result<()> {
        let hub_chain = self.app.config.hub.chain_id;
        let hub_tail = EventTail::new(
            self.app.hub.chain.clone(),
            self.app.hub.vault.address(),
            hub_event_topics(),
            self.app.config.hub.page_blocks,
            self.app.config.hub.confirmations,
        );
        let spoke_tails = self
            .app
            .spokes
            .values()
            .map(|spoke| {
                (
                    spoke.setup.chain_id,
                    EventTail::new(
                        spoke.chain.clone(),
                        spoke.proxy.address(),
                        spoke_event_topics(),
                        spoke.setup.page_blocks,
                        spoke.setup.confirmations,
                    ),
                )
            })
            .collect::<Vec<_>>();
        self.watch_periodic(
            TaskLabel::Monitor { chain: hub_chain },
            Monitor {
                target: MonitorTarget::Hub,
                tail: hub_tail,
            },
        )?;
        for (chain, tail) in spoke_tails {
            self.watch_periodic(
                TaskLabel::Monitor { chain },
                Monitor {
                    target: MonitorTarget::Spoke { chain },
                    tail,
                },
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl WatchedTask for Monitor {
    async fn run_single(&mut self, app: Arc<App>, _: Heartbeat) -> Result<WatchedTaskOutput> {
        let chain = match &self.target {
            MonitorTarget::Hub => app.config.hub.chain_id,
            MonitorTarget::Spoke { chain } => *chain,
        };
        let contract = self.tail.contract();
        let cursor = match app.db.cursor(chain, contract).await? {
            Some(cursor) => cursor,
            None => {
                // First run on this deployment: start at the safe head
                // rather than scanning history that predates us.
                let start = initial_cursor(&app, chain).await?;
                app.db.advance_cursor(chain, contract, start).await?;
                start
            }
        };
        let page = self.tail.next_page(cursor).await?;
        let mut handled = 0usize;
        for log in &page.logs {
            match &self.target {
                MonitorTarget::Hub => {
                    let effect = engine::handle_hub_log(&app.db, log).await?;
                    match effect {
                        HubEffect::PausedChanged { paused } => {
                            tracing::info!("Vault paused flag now {paused}");
                            app.set_paused(paused);
                        }
                        HubEffect::Settled { fingerprint, applied } => {
                            if applied {
                                tracing::info!("Settlement recorded for {fingerprint}");
                            }
                        }
                        HubEffect::None => {}
                    }
                }
                MonitorTarget::Spoke { chain } => {
                    let spoke = app.spoke(*chain)?;
                    let effect = engine::handle_spoke_log(
                        &app.db,
                        &spoke.proxy,
                        &app.hub.vault,
                        *chain,
                        log,
                    )
                    .await?;
                    match effect {
                        SpokeEffect::Liquidated { fingerprint } => {
                            // Phase 1 confirmed; make sure phase 2 runs
                            // even if the submitting controller died.
                            app.liquidation_trigger
                                .push(fingerprint, LiquidationReason::Recovery);
                        }
                        SpokeEffect::Executed { .. }
                        | SpokeEffect::AssetsReturned { .. }
                        | SpokeEffect::None => {}
                    }
                }
            }
            handled += 1;
        }
        if page.next_cursor > cursor {
            app.db.advance_cursor(chain, contract, page.next_cursor).await?;
        }
        let output =
            WatchedTaskOutput::new(format!("handled {handled} event(s), cursor {}", page.next_cursor));
        Ok(if handled > 0 {
            output.skip_delay()
        } else {
            output.suppress()
        })
    }
}

/// First-run cursor: the current safe head of the chain.
async fn initial_cursor(app: &App, chain: ChainId) -> Result<u64> {
    let (backend, confirmations) = if chain == app.config.hub.chain_id {
        (&app.hub.chain, app.config.hub.confirmations)
    } else {
        let spoke = app.spoke(chain)?;
        (&spoke.chain, spoke.setup.confirmations)
    };
    Ok(backend.head().await?.saturating_sub(confirmations))
}
