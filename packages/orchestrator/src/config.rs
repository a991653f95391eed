//! Process-wide configuration.
//!
//! Everything is loaded once at startup from a YAML file plus a handful
//! of CLI/env switches. Every struct denies unknown fields so a typoed
//! or stale option fails fast instead of being ignored.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use liquidot::{BasisPoints, ChainId, Preferences};
use serde::Deserialize;

/// Deployment environment. `test-mode` is only legal under `dev`.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    Dev,
    Staging,
    Production,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub environment: Environment,
    /// Skips real cross-chain sends; for local development only.
    /// Startup refuses this flag outside `environment: dev`.
    #[serde(default)]
    pub test_mode: bool,
    pub database_url: String,
    pub hub: HubConfig,
    pub spokes: Vec<SpokeConfig>,
    pub pool_source: PoolSourceConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub liquidation: LiquidationConfig,
    #[serde(default)]
    pub submitter: SubmitterSettings,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Operator-managed user roster; synced into the store at startup.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HubConfig {
    pub chain_id: ChainId,
    pub rpc_url: String,
    pub vault_address: String,
    /// Encoded location of the hub vault, handed to spokes for the
    /// return leg of a liquidation.
    #[serde(default = "defaults::hub_return_location")]
    pub return_location: String,
    #[serde(default = "defaults::confirmations")]
    pub confirmations: u64,
    #[serde(default = "defaults::page_blocks")]
    pub page_blocks: u64,
    /// Alert threshold for the operator's native balance, in wei.
    #[serde(default = "defaults::min_operator_balance")]
    pub min_operator_balance: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SpokeConfig {
    pub chain_id: ChainId,
    pub rpc_url: String,
    pub proxy_address: String,
    /// GraphQL endpoint serving this spoke's pool universe.
    pub pool_source_url: String,
    /// SCALE/ABI-encoded location of this spoke, threaded through hub
    /// dispatches.
    pub destination_location: String,
    #[serde(default = "defaults::confirmations")]
    pub confirmations: u64,
    #[serde(default = "defaults::page_blocks")]
    pub page_blocks: u64,
    #[serde(default = "defaults::min_operator_balance")]
    pub min_operator_balance: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PoolSourceConfig {
    /// Env var holding the static credential; absent means anonymous.
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default = "defaults::pool_page_size")]
    pub page_size: u32,
    /// Snapshots older than this are ineligible for new investments.
    #[serde(default = "defaults::pool_freshness_secs")]
    pub freshness_secs: u64,
    /// Consecutive absent cycles before a pool is soft-deleted.
    #[serde(default = "defaults::pool_max_missed_cycles")]
    pub max_missed_cycles: i64,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DecisionConfig {
    /// At most this many intents per user per evaluation.
    pub max_intents: u32,
    /// TVL floor in USD at risk level 1; scaled down as risk rises.
    pub min_tvl_usd: u64,
    /// Default range bounds for new positions, in basis points.
    pub lower_bound_bps: BasisPoints,
    pub upper_bound_bps: BasisPoints,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            max_intents: 3,
            min_tvl_usd: 100_000,
            lower_bound_bps: BasisPoints::new(-500),
            upper_bound_bps: BasisPoints::new(1000),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LiquidationConfig {
    /// Quotes summing below this many base-asset units halt phase 0.
    pub absolute_minimum: String,
    /// Phase 1 attempts before the position is handed to the operator.
    pub retry_bound: u32,
    /// Each liquidation phase must finish within this window.
    pub phase_deadline_secs: u64,
    /// Parallel liquidation workers.
    pub workers: usize,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        LiquidationConfig {
            absolute_minimum: "0".to_owned(),
            retry_bound: 3,
            phase_deadline_secs: 300,
            workers: 2,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SubmitterSettings {
    pub queue_depth: usize,
    pub inclusion_deadline_secs: u64,
    pub submit_retries: usize,
    pub shutdown_grace_secs: u64,
    pub request_timeout_secs: u64,
    pub read_retries: usize,
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        SubmitterSettings {
            queue_depth: 64,
            inclusion_deadline_secs: 120,
            submit_retries: 5,
            shutdown_grace_secs: 30,
            request_timeout_secs: 10,
            read_retries: 3,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserConfig {
    pub address: String,
    pub preferences: PreferencesConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PreferencesConfig {
    pub min_apr_bps: u32,
    pub max_allocation_bps: i32,
    pub base_assets: Vec<String>,
    pub risk_level: u8,
    pub stop_loss_bps: i32,
    pub take_profit_bps: i32,
    pub slippage_bps: i32,
}

impl PreferencesConfig {
    pub fn to_preferences(&self) -> Result<Preferences> {
        let prefs = Preferences {
            min_apr_bps: self.min_apr_bps,
            max_allocation_bps: BasisPoints::new(self.max_allocation_bps),
            base_assets: self
                .base_assets
                .iter()
                .map(|s| s.parse().with_context(|| format!("Bad base asset {s}")))
                .collect::<Result<_>>()?,
            risk_level: self.risk_level,
            stop_loss_bps: BasisPoints::new(self.stop_loss_bps),
            take_profit_bps: BasisPoints::new(self.take_profit_bps),
            slippage_bps: BasisPoints::new(self.slippage_bps),
        };
        prefs.validate()?;
        Ok(prefs)
    }
}

/// Per-task scheduling knobs, shared by every supervised loop.
#[derive(Deserialize, Clone, Copy, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskConfig {
    /// Seconds to delay between runs
    pub delay: Delay,
    /// How many seconds before we should consider the result out of date
    pub out_of_date: u32,
    /// Retries before giving up, overriding the general watcher config
    pub retries: Option<usize>,
    /// Seconds between retries, overriding the general watcher config
    pub delay_between_retries: Option<u32>,
}

impl TaskConfig {
    const fn constant(delay: u64, out_of_date: u32) -> Self {
        TaskConfig {
            delay: Delay::Constant(delay),
            out_of_date,
            retries: None,
            delay_between_retries: None,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum Delay {
    Constant(u64),
    Interval(u64),
    Random { low: u64, high: u64 },
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WatcherConfig {
    /// How many times to retry before giving up
    #[serde(default = "defaults::retries")]
    pub retries: usize,
    /// How many seconds to delay between retries
    #[serde(default = "defaults::delay_between_retries")]
    pub delay_between_retries: u32,
    #[serde(default = "defaults::ingest")]
    pub ingest: TaskConfig,
    #[serde(default = "defaults::decide")]
    pub decide: TaskConfig,
    #[serde(default = "defaults::dispatch")]
    pub dispatch: TaskConfig,
    #[serde(default = "defaults::execution_nudge")]
    pub execution_nudge: TaskConfig,
    #[serde(default = "defaults::monitor")]
    pub monitor: TaskConfig,
    #[serde(default = "defaults::range_watch")]
    pub range_watch: TaskConfig,
    #[serde(default = "defaults::liquidate")]
    pub liquidate: TaskConfig,
    #[serde(default = "defaults::operator_balance")]
    pub operator_balance: TaskConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            retries: defaults::retries(),
            delay_between_retries: defaults::delay_between_retries(),
            ingest: defaults::ingest(),
            decide: defaults::decide(),
            dispatch: defaults::dispatch(),
            execution_nudge: defaults::execution_nudge(),
            monitor: defaults::monitor(),
            range_watch: defaults::range_watch(),
            liquidate: defaults::liquidate(),
            operator_balance: defaults::operator_balance(),
        }
    }
}

mod defaults {
    use super::TaskConfig;

    pub(super) fn retries() -> usize {
        6
    }

    pub(super) fn delay_between_retries() -> u32 {
        10
    }

    pub(super) fn confirmations() -> u64 {
        2
    }

    pub(super) fn page_blocks() -> u64 {
        500
    }

    pub(super) fn pool_page_size() -> u32 {
        100
    }

    pub(super) fn pool_freshness_secs() -> u64 {
        900
    }

    pub(super) fn pool_max_missed_cycles() -> i64 {
        5
    }

    pub(super) fn min_operator_balance() -> String {
        "0".to_owned()
    }

    pub(super) fn hub_return_location() -> String {
        "0x".to_owned()
    }

    pub(super) fn ingest() -> TaskConfig {
        TaskConfig::constant(120, 600)
    }

    pub(super) fn decide() -> TaskConfig {
        TaskConfig::constant(60, 300)
    }

    pub(super) fn dispatch() -> TaskConfig {
        TaskConfig::constant(5, 120)
    }

    pub(super) fn execution_nudge() -> TaskConfig {
        TaskConfig::constant(60, 300)
    }

    pub(super) fn monitor() -> TaskConfig {
        TaskConfig::constant(10, 120)
    }

    pub(super) fn range_watch() -> TaskConfig {
        TaskConfig::constant(30, 180)
    }

    pub(super) fn liquidate() -> TaskConfig {
        TaskConfig::constant(5, 300)
    }

    pub(super) fn operator_balance() -> TaskConfig {
        TaskConfig::constant(60, 300)
    }
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs_err::File::open(path)?;
        let config: OrchestratorConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Could not parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.test_mode && self.environment != Environment::Dev {
            anyhow::bail!("test-mode is only allowed with environment: dev");
        }
        anyhow::ensure!(!self.spokes.is_empty(), "At least one spoke is required");
        let mut seen = HashMap::new();
        for spoke in &self.spokes {
            if let Some(prev) = seen.insert(spoke.chain_id, &spoke.rpc_url) {
                anyhow::bail!(
                    "Spoke chain {} configured twice ({} and {})",
                    spoke.chain_id,
                    prev,
                    spoke.rpc_url
                );
            }
            if spoke.chain_id == self.hub.chain_id {
                anyhow::bail!("Spoke chain {} collides with the hub", spoke.chain_id);
            }
            hex_blob(&spoke.destination_location).with_context(|| {
                format!("Bad destination-location for spoke {}", spoke.chain_id)
            })?;
        }
        for user in &self.users {
            user.preferences
                .to_preferences()
                .with_context(|| format!("Invalid preferences for user {}", user.address))?;
        }
        Ok(())
    }
}

/// Parse a 0x-prefixed hex blob from configuration.
pub fn hex_blob(s: &str) -> Result<Vec<u8>> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).with_context(|| format!("Invalid hex blob: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
environment: dev
database-url: "sqlite::memory:"
hub:
  chain-id: 420420
  rpc-url: "http://localhost:9933"
  vault-address: "0x1111111111111111111111111111111111111111"
spokes:
  - chain-id: 420421
    rpc-url: "http://localhost:9934"
    proxy-address: "0x2222222222222222222222222222222222222222"
    pool-source-url: "http://localhost:8000/graphql"
    destination-location: "0x010100a10f"
pool-source: {}
"#;

    #[test]
    fn minimal_config_parses() {
        let config: OrchestratorConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.spokes.len(), 1);
        assert!(!config.test_mode);
    }

    #[test]
    fn unknown_options_rejected() {
        let bad = format!("{MINIMAL}\nsurprise-option: true\n");
        assert!(serde_yaml::from_str::<OrchestratorConfig>(&bad).is_err());
    }

    #[test]
    fn test_mode_requires_dev() {
        let staging = MINIMAL
            .replace("environment: dev", "environment: staging")
            .replace("pool-source: {}", "pool-source: {}\ntest-mode: true");
        let config: OrchestratorConfig = serde_yaml::from_str(&staging).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_spoke_rejected() {
        let mut config: OrchestratorConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.spokes.push(config.spokes[0].clone());
        assert!(config.validate().is_err());
    }
}
