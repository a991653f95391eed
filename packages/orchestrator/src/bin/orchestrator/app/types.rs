use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liquidot::{ChainId, Fingerprint, InvestmentIntent};
use liquidot_orchestrator::chain::{
    spawn_submitter, ChainSubmitter, DynChain, EvmChain, EvmChainConfig, SubmitterConfig,
};
use liquidot_orchestrator::contracts::{ProxyContract, VaultContract};
use liquidot_orchestrator::db::{Db, UserRecord};
use liquidot_orchestrator::engine::LiquidationReason;
use parking_lot::Mutex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::cli::Opt;
use crate::config::{BotConfig, SpokeSetup};
use crate::watcher::{TaskStatuses, Watcher};

use super::manifest::AssumptionsManifest;
use super::queue::{Receiver, Trigger};

pub(crate) struct HubHandle {
    pub(crate) chain: DynChain,
    #[allow(dead_code)]
    pub(crate) submitter: ChainSubmitter,
    pub(crate) vault: VaultContract,
}

pub(crate) struct SpokeHandle {
    pub(crate) chain: DynChain,
    pub(crate) proxy: ProxyContract,
    pub(crate) setup: SpokeSetup,
}

/// A failed quote attempt kept for diagnostics (and for escalation once
/// the retry bound is crossed).
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct QuoteHalt {
    pub(crate) reason: String,
    pub(crate) attempts: u32,
    pub(crate) last_at: DateTime<Utc>,
}

pub(crate) struct App {
    pub(crate) config: BotConfig,
    pub(crate) db: Db,
    pub(crate) hub: HubHandle,
    pub(crate) spokes: HashMap<ChainId, SpokeHandle>,
    pub(crate) client: Client,
    pub(crate) live_since: DateTime<Utc>,
    pub(crate) statuses: TaskStatuses,
    pub(crate) manifest: &'static AssumptionsManifest,
    /// Mirrors the vault's paused flag; dispatch is suppressed while set.
    paused: AtomicBool,
    /// Positions whose phase-0 quote halted, for diagnostics.
    pub(crate) halted_quotes: Mutex<HashMap<Fingerprint, QuoteHalt>>,
    pub(crate) dispatch_trigger: Trigger<Fingerprint, InvestmentIntent>,
    pub(crate) liquidation_trigger: Trigger<Fingerprint, LiquidationReason>,
}

/// Helper data structure for building up an application.
pub(crate) struct AppBuilder {
    pub(crate) app: Arc<App>,
    pub(crate) watcher: Watcher,
    pub(crate) cancel: CancellationToken,
    pub(crate) dispatch_recv: Receiver<Fingerprint, InvestmentIntent>,
    pub(crate) liquidation_recv: Receiver<Fingerprint, LiquidationReason>,
}

impl App {
    pub(crate) fn spoke(&self, chain: ChainId) -> Result<&SpokeHandle> {
        self.spokes
            .get(&chain)
            .with_context(|| format!("No spoke configured for chain {chain}"))
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub(crate) fn record_quote_halt(&self, fingerprint: Fingerprint, reason: String) -> u32 {
        let mut halted = self.halted_quotes.lock();
        let entry = halted.entry(fingerprint).or_insert(QuoteHalt {
            reason: String::new(),
            attempts: 0,
            last_at: Utc::now(),
        });
        entry.reason = reason;
        entry.attempts += 1;
        entry.last_at = Utc::now();
        entry.attempts
    }

    pub(crate) fn clear_quote_halt(&self, fingerprint: Fingerprint) {
        self.halted_quotes.lock().remove(&fingerprint);
    }
}

impl Opt {
    pub(crate) async fn into_app_builder(self) -> Result<AppBuilder> {
        let config = self.get_bot_config()?;
        let db = Db::connect(&config.database_url).await?;

        // Sync the operator-managed roster into the store.
        for (address, preferences) in &config.users {
            db.upsert_user(&UserRecord {
                address: *address,
                preferences: preferences.clone(),
            })
            .await?;
        }

        let client = Client::builder()
            .user_agent("liquidot-orchestrator")
            .timeout(Duration::from_secs(config.submitter.request_timeout_secs))
            .build()?;

        let cancel = CancellationToken::new();
        let submitter_config = SubmitterConfig {
            queue_depth: config.submitter.queue_depth,
            inclusion_deadline: Duration::from_secs(config.submitter.inclusion_deadline_secs),
            submit_retries: config.submitter.submit_retries,
            shutdown_grace: Duration::from_secs(config.submitter.shutdown_grace_secs),
        };

        let make_chain = |chain_id: ChainId, rpc_url: &str| -> Result<DynChain> {
            let chain = EvmChain::new(
                EvmChainConfig {
                    chain: chain_id,
                    rpc_url: rpc_url.to_owned(),
                    request_timeout: Duration::from_secs(config.submitter.request_timeout_secs),
                    read_retries: config.submitter.read_retries,
                },
                &config.operator_key,
            )?;
            Ok(Arc::new(chain))
        };

        let hub_chain = make_chain(config.hub.chain_id, &config.hub.rpc_url)?;
        let hub_seeds = db.oplog_broadcast_for_chain(config.hub.chain_id).await?;
        let hub_submitter = spawn_submitter(
            hub_chain.clone(),
            submitter_config.clone(),
            hub_seeds,
            cancel.clone(),
        );
        let hub = HubHandle {
            chain: hub_chain.clone(),
            vault: VaultContract::new(hub_chain, hub_submitter.clone(), config.hub.vault),
            submitter: hub_submitter,
        };

        let mut spokes = HashMap::new();
        for setup in &config.spokes {
            let chain = make_chain(setup.chain_id, &setup.rpc_url)?;
            let seeds = db.oplog_broadcast_for_chain(setup.chain_id).await?;
            let submitter =
                spawn_submitter(chain.clone(), submitter_config.clone(), seeds, cancel.clone());
            spokes.insert(
                setup.chain_id,
                SpokeHandle {
                    chain: chain.clone(),
                    proxy: ProxyContract::new(chain, submitter, setup.proxy),
                    setup: setup.clone(),
                },
            );
        }

        let manifest = AssumptionsManifest::load()?;
        let dispatch_recv = Receiver::new();
        let liquidation_recv = Receiver::new();

        let app = App {
            db,
            hub,
            spokes,
            client,
            live_since: Utc::now(),
            statuses: TaskStatuses::default(),
            manifest,
            paused: AtomicBool::new(false),
            halted_quotes: Mutex::new(HashMap::new()),
            dispatch_trigger: dispatch_recv.trigger.clone(),
            liquidation_trigger: liquidation_recv.trigger.clone(),
            config,
        };
        Ok(AppBuilder {
            app: Arc::new(app),
            watcher: Watcher::default(),
            cancel,
            dispatch_recv,
            liquidation_recv,
        })
    }
}
