use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use liquidot_orchestrator::build_version;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(clap::Parser, Clone)]
#[clap(version = build_version())]
pub(crate) struct Opt {
    #[clap(long, short)]
    verbose: bool,
    /// Bind address for the diagnostics HTTP surface
    #[clap(long, default_value = "[::]:3000", env = "LIQUIDOT_BIND")]
    pub(crate) bind: SocketAddr,
    /// Path to the orchestrator YAML configuration
    #[clap(long, env = "LIQUIDOT_CONFIG", default_value = "config/orchestrator.yaml")]
    pub(crate) config: PathBuf,
    /// Override the database URL from the config file
    #[clap(long, env = "LIQUIDOT_DATABASE_URL")]
    pub(crate) database_url: Option<String>,
    /// Operator private key; the single credential used on every chain
    #[clap(long, env = "LIQUIDOT_OPERATOR_KEY", hide_env_values = true)]
    pub(crate) operator_key: String,
}

impl Opt {
    pub(crate) fn init_logger(&self) -> Result<()> {
        let env_directive = if self.verbose {
            format!("{}=debug,liquidot=debug,info", env!("CARGO_CRATE_NAME")).parse()?
        } else {
            Level::INFO.into()
        };

        tracing_subscriber::registry()
            .with(
                fmt::Layer::default()
                    .log_internal_errors(true)
                    .and_then(EnvFilter::from_default_env().add_directive(env_directive)),
            )
            .init();
        tracing::info!("Initialized Logging");
        Ok(())
    }
}
