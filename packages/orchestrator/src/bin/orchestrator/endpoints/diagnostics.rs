use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use liquidot_orchestrator::chain::DynChain;
use reqwest::StatusCode;
use serde::Serialize;

use crate::app::{App, QuoteHalt};

#[derive(Serialize)]
pub(crate) struct Diagnostics {
    build_version: &'static str,
    live_since: DateTime<Utc>,
    environment: String,
    test_mode: bool,
    vault_paused: bool,
    chains: Vec<ChainDiagnostics>,
    cursors: Vec<CursorDiagnostics>,
    positions: BTreeMap<String, i64>,
    queued_intents: usize,
    queued_liquidations: usize,
    halted_quotes: Vec<HaltedQuote>,
    tasks: Vec<TaskSummary>,
}

#[derive(Serialize)]
struct ChainDiagnostics {
    chain: u64,
    role: &'static str,
    contract: String,
    rpc_reachable: bool,
    head: Option<u64>,
    runtime_version: Option<String>,
}

#[derive(Serialize)]
struct CursorDiagnostics {
    chain: u64,
    contract: String,
    next_block: u64,
    updated_at: DateTime<Utc>,
    /// Set when the tail has not advanced within its staleness bound.
    degraded: bool,
}

#[derive(Serialize)]
struct HaltedQuote {
    fingerprint: String,
    #[serde(flatten)]
    halt: QuoteHalt,
}

#[derive(Serialize)]
struct TaskSummary {
    task: String,
    status: String,
}

/// Read-only health surface: RPC reachability, runtime versions,
/// configured contracts, event cursors and per-status position counts.
pub(crate) async fn diagnostics(
    State(app): State<Arc<App>>,
) -> Result<Json<Diagnostics>, (StatusCode, String)> {
    let mut chains = Vec::new();
    chains.push(
        probe_chain(
            &app.hub.chain,
            "hub",
            format!("{:#x}", app.hub.vault.address()),
        )
        .await,
    );
    for spoke in app.spokes.values() {
        chains.push(
            probe_chain(
                &spoke.chain,
                "spoke",
                format!("{:#x}", spoke.proxy.address()),
            )
            .await,
        );
    }
    chains.sort_by_key(|chain| chain.chain);

    let staleness = chrono::Duration::seconds(i64::from(
        app.config.watcher().monitor.out_of_date,
    ));
    let now = Utc::now();
    let cursors = app
        .db
        .all_cursors()
        .await
        .map_err(internal)?
        .into_iter()
        .map(|(chain, contract, next_block, updated_at)| CursorDiagnostics {
            chain: chain.u64(),
            contract: format!("{contract:#x}"),
            next_block,
            updated_at,
            degraded: now.signed_duration_since(updated_at) > staleness,
        })
        .collect();

    let positions = app
        .db
        .status_counts()
        .await
        .map_err(internal)?
        .into_iter()
        .map(|(status, count)| (status.as_str().to_owned(), count))
        .collect();

    let halted_quotes = app
        .halted_quotes
        .lock()
        .iter()
        .map(|(fingerprint, halt)| HaltedQuote {
            fingerprint: fingerprint.to_string(),
            halt: halt.clone(),
        })
        .collect();

    let tasks = app
        .statuses
        .summary()
        .into_iter()
        .map(|(task, status)| TaskSummary { task, status })
        .collect();

    Ok(Json(Diagnostics {
        build_version: liquidot_orchestrator::build_version(),
        live_since: app.live_since,
        environment: format!("{:?}", app.config.environment).to_lowercase(),
        test_mode: app.config.test_mode,
        vault_paused: app.is_paused(),
        chains,
        cursors,
        positions,
        queued_intents: app.dispatch_trigger.queued(),
        queued_liquidations: app.liquidation_trigger.queued(),
        halted_quotes,
        tasks,
    }))
}

async fn probe_chain(backend: &DynChain, role: &'static str, contract: String) -> ChainDiagnostics {
    let head = backend.head().await.ok();
    let runtime_version = backend.runtime_version().await.ok();
    ChainDiagnostics {
        chain: backend.chain_id().u64(),
        role,
        contract,
        rpc_reachable: head.is_some(),
        head,
        runtime_version,
    }
}

fn internal(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}
