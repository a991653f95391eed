use std::str::FromStr;

use alloy::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use liquidot::ChainId;
use liquidot_orchestrator::config::{
    hex_blob, DecisionConfig, Environment, LiquidationConfig, OrchestratorConfig,
    PoolSourceConfig, SubmitterSettings, WatcherConfig,
};

use crate::cli::Opt;

/// Fully resolved runtime configuration: the parsed YAML file plus
/// everything that needed env lookups or address parsing.
pub(crate) struct BotConfig {
    pub(crate) environment: Environment,
    pub(crate) test_mode: bool,
    pub(crate) database_url: String,
    pub(crate) operator_key: String,
    pub(crate) pool_credential: Option<String>,
    pub(crate) hub: HubSetup,
    pub(crate) spokes: Vec<SpokeSetup>,
    pub(crate) pool_source: PoolSourceConfig,
    pub(crate) decision: DecisionConfig,
    pub(crate) liquidation: LiquidationConfig,
    pub(crate) absolute_minimum: U256,
    pub(crate) submitter: SubmitterSettings,
    watcher: WatcherConfig,
    pub(crate) users: Vec<(Address, liquidot::Preferences)>,
}

#[derive(Clone)]
pub(crate) struct HubSetup {
    pub(crate) chain_id: ChainId,
    pub(crate) rpc_url: String,
    pub(crate) vault: Address,
    pub(crate) return_location: Bytes,
    pub(crate) confirmations: u64,
    pub(crate) page_blocks: u64,
    pub(crate) min_operator_balance: U256,
}

#[derive(Clone)]
pub(crate) struct SpokeSetup {
    pub(crate) chain_id: ChainId,
    pub(crate) rpc_url: String,
    pub(crate) proxy: Address,
    pub(crate) pool_source_url: String,
    pub(crate) destination_location: Bytes,
    pub(crate) confirmations: u64,
    pub(crate) page_blocks: u64,
    pub(crate) min_operator_balance: U256,
}

impl BotConfig {
    pub(crate) fn watcher(&self) -> WatcherConfig {
        self.watcher.clone()
    }
}

impl Opt {
    pub(crate) fn get_bot_config(&self) -> Result<BotConfig> {
        let file = OrchestratorConfig::load(&self.config)?;
        let pool_credential = match &file.pool_source.credential_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("Unable to load environment variable {var}"))?,
            ),
            None => None,
        };
        let hub = HubSetup {
            chain_id: file.hub.chain_id,
            rpc_url: file.hub.rpc_url.clone(),
            vault: Address::from_str(&file.hub.vault_address)
                .context("Bad hub vault address")?,
            return_location: hex_blob(&file.hub.return_location)
                .context("Bad hub return-location")?
                .into(),
            confirmations: file.hub.confirmations,
            page_blocks: file.hub.page_blocks,
            min_operator_balance: U256::from_str(&file.hub.min_operator_balance)
                .context("Bad hub min-operator-balance")?,
        };
        let spokes = file
            .spokes
            .iter()
            .map(|spoke| {
                Ok(SpokeSetup {
                    chain_id: spoke.chain_id,
                    rpc_url: spoke.rpc_url.clone(),
                    proxy: Address::from_str(&spoke.proxy_address).with_context(|| {
                        format!("Bad proxy address for spoke {}", spoke.chain_id)
                    })?,
                    pool_source_url: spoke.pool_source_url.clone(),
                    destination_location: hex_blob(&spoke.destination_location)?.into(),
                    confirmations: spoke.confirmations,
                    page_blocks: spoke.page_blocks,
                    min_operator_balance: U256::from_str(&spoke.min_operator_balance)
                        .with_context(|| {
                            format!("Bad min-operator-balance for spoke {}", spoke.chain_id)
                        })?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let users = file
            .users
            .iter()
            .map(|user| {
                Ok((
                    Address::from_str(&user.address)
                        .with_context(|| format!("Bad user address {}", user.address))?,
                    user.preferences.to_preferences()?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let absolute_minimum = U256::from_str(&file.liquidation.absolute_minimum)
            .context("Bad liquidation absolute-minimum")?;
        Ok(BotConfig {
            environment: file.environment,
            test_mode: file.test_mode,
            database_url: self
                .database_url
                .clone()
                .unwrap_or_else(|| file.database_url.clone()),
            operator_key: self.operator_key.clone(),
            pool_credential,
            hub,
            spokes,
            pool_source: file.pool_source.clone(),
            decision: file.decision.clone(),
            liquidation: file.liquidation.clone(),
            absolute_minimum,
            submitter: file.submitter.clone(),
            watcher: file.watcher.clone(),
            users,
        })
    }
}
